//! 资源切片
//!
//! 资源可以是容器文件中的一段字节（例如打包在安装包里的音频），
//! 用 [`FileSlice`] 把这段字节暴露为可 seek 的 symphonia `MediaSource`。

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use symphonia::core::io::MediaSource;

use super::DecodeError;

/// 要播放的资源：文件路径 + 字节偏移 + 字节长度
///
/// `length == 0` 表示从 `offset` 一直到文件末尾
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetSource {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

impl AssetSource {
    /// 整个文件
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self::slice(path, 0, 0)
    }

    /// 文件中的一段
    pub fn slice<P: AsRef<Path>>(path: P, offset: u64, length: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset,
            length,
        }
    }

    /// 文件扩展名（用作格式探测提示）
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }
}

impl fmt::Display for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset == 0 && self.length == 0 {
            write!(f, "{}", self.path.display())
        } else {
            write!(
                f,
                "{} [{}+{}]",
                self.path.display(),
                self.offset,
                self.length
            )
        }
    }
}

/// 文件中一段字节的只读视图
///
/// 所有位置都相对于切片起点
pub struct FileSlice {
    file: File,
    start: u64,
    len: u64,
    pos: u64,
}

impl FileSlice {
    pub fn open(source: &AssetSource) -> Result<Self, DecodeError> {
        let mut file = File::open(&source.path).map_err(DecodeError::FileOpen)?;
        let file_len = file.metadata().map_err(DecodeError::FileOpen)?.len();

        let invalid = || DecodeError::InvalidSlice {
            offset: source.offset,
            length: source.length,
            file_len,
        };

        if source.offset > file_len {
            return Err(invalid());
        }
        let len = if source.length == 0 {
            file_len - source.offset
        } else {
            source.length
        };
        if source.offset.checked_add(len).map_or(true, |end| end > file_len) {
            return Err(invalid());
        }

        file.seek(SeekFrom::Start(source.offset))
            .map_err(DecodeError::FileOpen)?;

        Ok(Self {
            file,
            start: source.offset,
            len,
            pos: 0,
        })
    }

    /// 切片长度（字节）
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for FileSlice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.file.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FileSlice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of asset slice")
        })?;

        self.file.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}

impl MediaSource for FileSlice {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}
