//! Lock-free Single-Producer Single-Consumer Ring Buffer
//!
//! 设计目标：
//! - 零锁：生产者和消费者完全无锁操作
//! - 零分配：所有内存在初始化时预分配
//! - 缓存友好：读写索引各自独占 cache line，避免 false sharing
//!
//! 用于控制线程（生产者）向音频线程（消费者）投递命令。
//! `channel()` 返回的两个半边分别只能有一个持有者，类型层面保证 SPSC。

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use super::memory;

/// SPSC 无锁环形缓冲区
struct RingBuffer<T: Copy + Default> {
    buffer: Box<[UnsafeCell<T>]>,
    capacity: usize,
    mask: usize,

    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,

    memory_locked: AtomicBool,
}

unsafe impl<T: Copy + Default + Send> Send for RingBuffer<T> {}
unsafe impl<T: Copy + Default + Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// 创建指定容量的 Ring Buffer
    ///
    /// capacity 必须是 2 的幂
    fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of two");

        let buffer: Vec<UnsafeCell<T>> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
            memory_locked: AtomicBool::new(false),
        }
    }

    /// 创建指定最小容量的 Ring Buffer（自动向上取整到 2 的幂）
    fn with_min_capacity(min_capacity: usize) -> Self {
        Self::new(min_capacity.max(1).next_power_of_two())
    }

    /// 锁定缓冲区内存，防止被换页
    fn lock_memory(&self) -> bool {
        if self.memory_locked.load(Ordering::Acquire) {
            return true;
        }
        let locked = memory::lock_slice(&self.buffer[..]);
        if locked {
            self.memory_locked.store(true, Ordering::Release);
        }
        locked
    }

    /// 写入一个元素（生产者调用）
    ///
    /// 满时原样返回元素。wait-free，绝不阻塞
    #[inline]
    fn push(&self, value: T) -> Result<(), T> {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let used = write.wrapping_sub(read);
        debug_assert!(used <= self.capacity, "ring buffer invariant violated: used > capacity");

        if used == self.capacity {
            return Err(value);
        }

        unsafe {
            *self.buffer[write & self.mask].get() = value;
        }
        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// 读取一个元素（消费者调用）。wait-free，绝不阻塞
    #[inline]
    fn pop(&self) -> Option<T> {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        if write == read {
            return None;
        }

        let value = unsafe { *self.buffer[read & self.mask].get() };
        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// 获取当前可读元素数
    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// 获取当前可写空间
    #[inline]
    fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    /// 获取容量
    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Copy + Default> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        if self.memory_locked.load(Ordering::Acquire) {
            memory::unlock_slice(&self.buffer[..]);
        }
    }
}

/// 创建一对 SPSC 半边，容量向上取整到 2 的幂
pub fn channel<T: Copy + Default>(min_capacity: usize) -> (Sender<T>, Receiver<T>) {
    let ring = Arc::new(RingBuffer::with_min_capacity(min_capacity));
    (
        Sender {
            ring: Arc::clone(&ring),
        },
        Receiver { ring },
    )
}

/// 生产者半边（控制路径）
pub struct Sender<T: Copy + Default> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy + Default> Sender<T> {
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        self.ring.push(value)
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// 消费者半边（音频线程）
pub struct Receiver<T: Copy + Default> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy + Default> Receiver<T> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.ring.pop()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    pub fn lock_memory(&self) -> bool {
        self.ring.lock_memory()
    }
}
