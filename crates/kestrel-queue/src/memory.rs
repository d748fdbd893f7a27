use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::{Context, ContextId};
use crate::error::QueueError;

#[derive(Debug)]
struct BufferInner {
    context: ContextId,
    data: Mutex<Vec<u8>>,
}

/// A context-tagged byte buffer. Clones alias the same storage.
///
/// Sizes are fixed at creation. All accessors bounds-check and report
/// [`QueueError::BufferOutOfBounds`] instead of panicking, so violations
/// found at execution time can flow back through completion events.
#[derive(Debug, Clone)]
pub struct MemBuffer {
    inner: Arc<BufferInner>,
}

impl MemBuffer {
    pub fn new(context: &Context, size: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                context: context.id(),
                data: Mutex::new(vec![0; size]),
            }),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.data.lock().unwrap()
    }

    fn check_range(size: usize, offset: usize, len: usize) -> Result<(), QueueError> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(QueueError::BufferOutOfBounds { offset, len, size }),
        }
    }

    /// Bounds-check `offset..offset + len` against this buffer.
    pub fn check_access(&self, offset: usize, len: usize) -> Result<(), QueueError> {
        Self::check_range(self.len(), offset, len)
    }

    pub fn read(&self, offset: usize, dest: &mut [u8]) -> Result<(), QueueError> {
        let data = self.lock();
        Self::check_range(data.len(), offset, dest.len())?;
        dest.copy_from_slice(&data[offset..offset + dest.len()]);
        Ok(())
    }

    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), QueueError> {
        let mut data = self.lock();
        Self::check_range(data.len(), offset, src.len())?;
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy of the whole buffer contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Repeat `pattern` across `offset..offset + len`. The range length must
    /// be a multiple of the pattern length.
    pub fn fill(&self, pattern: &[u8], offset: usize, len: usize) -> Result<(), QueueError> {
        if pattern.is_empty() {
            return Err(QueueError::EmptyPattern);
        }
        if len % pattern.len() != 0 {
            return Err(QueueError::PatternSizeMismatch {
                len,
                pattern_len: pattern.len(),
            });
        }
        let mut data = self.lock();
        Self::check_range(data.len(), offset, len)?;
        for chunk in data[offset..offset + len].chunks_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }
        Ok(())
    }

    /// Copy `len` bytes from `self[src_offset..]` into `dst[dst_offset..]`.
    ///
    /// `self` and `dst` may alias the same storage.
    pub fn copy_to(
        &self,
        dst: &MemBuffer,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    ) -> Result<(), QueueError> {
        if Arc::ptr_eq(&self.inner, &dst.inner) {
            let mut data = self.lock();
            Self::check_range(data.len(), src_offset, len)?;
            Self::check_range(data.len(), dst_offset, len)?;
            data.copy_within(src_offset..src_offset + len, dst_offset);
            return Ok(());
        }

        let src_data = self.lock();
        let mut dst_data = dst.lock();
        Self::check_range(src_data.len(), src_offset, len)?;
        Self::check_range(dst_data.len(), dst_offset, len)?;
        dst_data[dst_offset..dst_offset + len]
            .copy_from_slice(&src_data[src_offset..src_offset + len]);
        Ok(())
    }

    /// Copy a 2-D region between buffers viewed as pitched row-major arrays.
    ///
    /// Origins and region are `[bytes_in_row, rows]`; pitches are the byte
    /// strides between consecutive rows of each view.
    pub fn copy_rect_to(&self, dst: &MemBuffer, rect: &BufferRectCopy) -> Result<(), QueueError> {
        let [width, rows] = rect.region;
        for row in 0..rows {
            let src_offset = rect.src_origin[0] + (rect.src_origin[1] + row) * rect.src_row_pitch;
            let dst_offset = rect.dst_origin[0] + (rect.dst_origin[1] + row) * rect.dst_row_pitch;
            self.copy_to(dst, src_offset, dst_offset, width)?;
        }
        Ok(())
    }
}

/// Parameters of a pitched 2-D buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRectCopy {
    /// `[byte offset within a row, row index]` in the source view.
    pub src_origin: [usize; 2],
    /// `[byte offset within a row, row index]` in the destination view.
    pub dst_origin: [usize; 2],
    /// `[bytes per row, rows]`.
    pub region: [usize; 2],
    pub src_row_pitch: usize,
    pub dst_row_pitch: usize,
}

#[derive(Debug)]
struct ImageInner {
    context: ContextId,
    width: usize,
    height: usize,
    elem_size: usize,
    data: Mutex<Vec<u8>>,
}

/// A 2-D image with a fixed element size, stored row-major and tightly
/// packed. Clones alias the same storage.
#[derive(Debug, Clone)]
pub struct MemImage {
    inner: Arc<ImageInner>,
}

impl MemImage {
    pub fn new(context: &Context, width: usize, height: usize, elem_size: usize) -> Self {
        assert!(elem_size > 0, "image element size must be non-zero");
        Self {
            inner: Arc::new(ImageInner {
                context: context.id(),
                width,
                height,
                elem_size,
                data: Mutex::new(vec![0; width * height * elem_size]),
            }),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub fn width(&self) -> usize {
        self.inner.width
    }

    pub fn height(&self) -> usize {
        self.inner.height
    }

    pub fn elem_size(&self) -> usize {
        self.inner.elem_size
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.data.lock().unwrap().clone()
    }

    /// Bounds-check a `[w, h]` region at `origin`.
    pub fn check_region(&self, origin: [usize; 2], region: [usize; 2]) -> Result<(), QueueError> {
        let fits_x = origin[0]
            .checked_add(region[0])
            .is_some_and(|end| end <= self.inner.width);
        let fits_y = origin[1]
            .checked_add(region[1])
            .is_some_and(|end| end <= self.inner.height);
        if !fits_x || !fits_y {
            return Err(QueueError::ImageOutOfBounds {
                origin,
                region,
                width: self.inner.width,
                height: self.inner.height,
            });
        }
        Ok(())
    }

    fn row_span(&self, origin: [usize; 2], row: usize, width: usize) -> std::ops::Range<usize> {
        let elem = self.inner.elem_size;
        let start = ((origin[1] + row) * self.inner.width + origin[0]) * elem;
        start..start + width * elem
    }

    /// Set every element of the region to `pattern` (one element's bytes).
    pub fn fill(
        &self,
        pattern: &[u8],
        origin: [usize; 2],
        region: [usize; 2],
    ) -> Result<(), QueueError> {
        if pattern.is_empty() {
            return Err(QueueError::EmptyPattern);
        }
        if pattern.len() != self.inner.elem_size {
            return Err(QueueError::PatternElementMismatch {
                pattern_len: pattern.len(),
                elem_size: self.inner.elem_size,
            });
        }
        self.check_region(origin, region)?;
        let mut data = self.inner.data.lock().unwrap();
        for row in 0..region[1] {
            let span = self.row_span(origin, row, region[0]);
            for chunk in data[span].chunks_mut(pattern.len()) {
                chunk.copy_from_slice(pattern);
            }
        }
        Ok(())
    }

    /// Copy a region into `dst` at `dst_origin`. Element sizes must match.
    pub fn copy_to(
        &self,
        dst: &MemImage,
        src_origin: [usize; 2],
        dst_origin: [usize; 2],
        region: [usize; 2],
    ) -> Result<(), QueueError> {
        if self.inner.elem_size != dst.inner.elem_size {
            return Err(QueueError::ElementSizeMismatch {
                src: self.inner.elem_size,
                dst: dst.inner.elem_size,
            });
        }
        self.check_region(src_origin, region)?;
        dst.check_region(dst_origin, region)?;

        if Arc::ptr_eq(&self.inner, &dst.inner) {
            let mut data = self.inner.data.lock().unwrap();
            for row in 0..region[1] {
                let src_span = self.row_span(src_origin, row, region[0]);
                let dst_span = self.row_span(dst_origin, row, region[0]);
                data.copy_within(src_span, dst_span.start);
            }
            return Ok(());
        }

        let src_data = self.inner.data.lock().unwrap();
        let mut dst_data = dst.inner.data.lock().unwrap();
        for row in 0..region[1] {
            let src_span = self.row_span(src_origin, row, region[0]);
            let dst_span = dst.row_span(dst_origin, row, region[0]);
            dst_data[dst_span].copy_from_slice(&src_data[src_span]);
        }
        Ok(())
    }

    /// Copy a region into `dst` starting at `dst_offset`, tightly packed.
    pub fn copy_to_buffer(
        &self,
        dst: &MemBuffer,
        origin: [usize; 2],
        region: [usize; 2],
        dst_offset: usize,
    ) -> Result<(), QueueError> {
        self.check_region(origin, region)?;
        let row_bytes = region[0] * self.inner.elem_size;
        dst.check_access(dst_offset, row_bytes * region[1])?;

        let src_data = self.inner.data.lock().unwrap();
        for row in 0..region[1] {
            let span = self.row_span(origin, row, region[0]);
            dst.write(dst_offset + row * row_bytes, &src_data[span])?;
        }
        Ok(())
    }

    /// Fill a region from tightly packed bytes in `src` at `src_offset`.
    pub fn copy_from_buffer(
        &self,
        src: &MemBuffer,
        src_offset: usize,
        origin: [usize; 2],
        region: [usize; 2],
    ) -> Result<(), QueueError> {
        self.check_region(origin, region)?;
        let row_bytes = region[0] * self.inner.elem_size;
        src.check_access(src_offset, row_bytes * region[1])?;

        let mut dst_data = self.inner.data.lock().unwrap();
        for row in 0..region[1] {
            let span = self.row_span(origin, row, region[0]);
            src.read(src_offset + row * row_bytes, &mut dst_data[span])?;
        }
        Ok(())
    }
}
