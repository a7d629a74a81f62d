//! 实时内存锁定
//!
//! 渲染路径上触碰的内存如果被换出，page fault 会直接造成 deadline miss。
//! 这里对 slice 做 mlock / munlock，失败只记录日志，不影响播放。

/// 锁定 slice 所在内存，返回是否成功
pub fn lock_slice<T>(slice: &[T]) -> bool {
    let len = std::mem::size_of_val(slice);
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        let result = unsafe { libc::mlock(slice.as_ptr() as *const libc::c_void, len) };
        if result == 0 {
            log::debug!("Locked {} bytes of realtime memory", len);
            true
        } else {
            log::warn!(
                "Failed to lock {} bytes of realtime memory: {}",
                len,
                std::io::Error::last_os_error()
            );
            false
        }
    }

    #[cfg(not(unix))]
    {
        log::debug!("Memory locking unsupported on this platform ({} bytes)", len);
        false
    }
}

/// 解锁 slice 所在内存
pub fn unlock_slice<T>(slice: &[T]) {
    let len = std::mem::size_of_val(slice);
    if len == 0 {
        return;
    }

    #[cfg(unix)]
    unsafe {
        libc::munlock(slice.as_ptr() as *const libc::c_void, len);
    }
}
