//! Cache-line-aligned bulk allocation with optional huge-page backing.
//!
//! The dataset and the per-VM scratchpads are the hot memory of this crate;
//! both want 64-byte alignment and, for the dataset, huge pages to keep TLB
//! pressure down. Allocation degrades gracefully: 1 GiB pages fall back to
//! transparent huge pages, which fall back to normal pages, with the achieved
//! backing reported through [`AlignedBuffer::page_kind`].
#![allow(unsafe_code)]

use log::debug;

use crate::types::{Error, Result};

/// Page backing actually achieved for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Regular pages.
    Normal,
    /// Regular allocation advised to use transparent huge pages.
    TransparentHuge,
    /// Explicit 1 GiB hugetlb mapping.
    OneGb,
}

/// Allocation parameters.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    /// Usable size in bytes.
    pub size: usize,
    /// Advise the kernel to back the region with huge pages.
    pub large_pages: bool,
    /// Try an explicit 1 GiB hugetlb mapping first.
    pub one_gb_pages: bool,
    /// Preferred NUMA node. Recorded for the caller; binding is left to the
    /// thread placement policy of the embedding application.
    pub numa_node: Option<u32>,
}

impl AllocRequest {
    /// A plain zeroed allocation of `size` bytes.
    #[must_use]
    pub const fn plain(size: usize) -> Self {
        Self {
            size,
            large_pages: false,
            one_gb_pages: false,
            numa_node: None,
        }
    }
}

#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct CacheCell([u8; 64]);

enum Backing {
    Cells(Vec<CacheCell>),
    #[cfg(target_os = "linux")]
    HugeTlb {
        ptr: core::ptr::NonNull<u8>,
        mapped: usize,
    },
}

// SAFETY: a HugeTlb backing exclusively owns its mapping; the bytes carry no
// thread affinity.
unsafe impl Send for Backing {}
// SAFETY: shared access only hands out &[u8]; mutation requires &mut.
unsafe impl Sync for Backing {}

/// A zero-initialised, 64-byte-aligned byte buffer.
pub struct AlignedBuffer {
    backing: Backing,
    len: usize,
    kind: PageKind,
    numa_node: Option<u32>,
}

impl AlignedBuffer {
    /// Allocates per `req`, degrading page backing as needed. Fails only when
    /// the address space itself cannot be reserved.
    pub fn allocate(req: &AllocRequest) -> Result<Self> {
        if req.size == 0 {
            return Err(Error::Allocation("zero-sized buffer"));
        }

        #[cfg(target_os = "linux")]
        if req.one_gb_pages {
            match Self::allocate_hugetlb(req.size) {
                Some(mut buffer) => {
                    buffer.numa_node = req.numa_node;
                    return Ok(buffer);
                }
                None => log::warn!(
                    "1 GiB page mapping of {} bytes failed, falling back",
                    req.size
                ),
            }
        }

        let cells = req.size.div_ceil(64);
        let mut vec: Vec<CacheCell> = Vec::new();
        vec.try_reserve_exact(cells)
            .map_err(|_| Error::Allocation("buffer reservation failed"))?;
        vec.resize(cells, CacheCell([0; 64]));

        let mut kind = PageKind::Normal;
        if req.large_pages || req.one_gb_pages {
            if advise_huge_pages(vec.as_mut_ptr().cast(), cells * 64) {
                kind = PageKind::TransparentHuge;
            } else {
                debug!("transparent huge page advice not honoured");
            }
        }

        Ok(Self {
            backing: Backing::Cells(vec),
            len: req.size,
            kind,
            numa_node: req.numa_node,
        })
    }

    #[cfg(target_os = "linux")]
    fn allocate_hugetlb(size: usize) -> Option<Self> {
        const ONE_GB: usize = 1 << 30;
        let mapped = size.div_ceil(ONE_GB) * ONE_GB;
        // MAP_HUGE_1GB = 30 << MAP_HUGE_SHIFT
        let huge_1gb = 30 << libc::MAP_HUGE_SHIFT;
        // SAFETY: anonymous mapping with no fixed address; the result is
        // checked before use.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | huge_1gb,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        Some(Self {
            backing: Backing::HugeTlb {
                // SAFETY: mmap success implies a non-null pointer.
                ptr: unsafe { core::ptr::NonNull::new_unchecked(ptr.cast()) },
                mapped,
            },
            len: size,
            kind: PageKind::OneGb,
            numa_node: None,
        })
    }

    /// Usable length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if the buffer holds no bytes. Allocation rejects zero sizes, so
    /// this is always false for a live buffer.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Achieved page backing.
    #[must_use]
    pub const fn page_kind(&self) -> PageKind {
        self.kind
    }

    /// NUMA node recorded at allocation, if any.
    #[must_use]
    pub const fn numa_node(&self) -> Option<u32> {
        self.numa_node
    }

    /// Read access to the whole buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Cells(vec) => {
                // SAFETY: CacheCell is a transparent 64-byte array; the first
                // `len` bytes are within the vector's initialised cells.
                unsafe { core::slice::from_raw_parts(vec.as_ptr().cast(), self.len) }
            }
            #[cfg(target_os = "linux")]
            Backing::HugeTlb { ptr, .. } => {
                // SAFETY: the mapping covers at least `len` zero-initialised
                // bytes for the lifetime of self.
                unsafe { core::slice::from_raw_parts(ptr.as_ptr(), self.len) }
            }
        }
    }

    /// Write access to the whole buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Cells(vec) => {
                // SAFETY: as for as_slice, with exclusive access through &mut.
                unsafe { core::slice::from_raw_parts_mut(vec.as_mut_ptr().cast(), self.len) }
            }
            #[cfg(target_os = "linux")]
            Backing::HugeTlb { ptr, .. } => {
                // SAFETY: as for as_slice, with exclusive access through &mut.
                unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) }
            }
        }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        if let Backing::HugeTlb { ptr, mapped } = &self.backing {
            // SAFETY: the pointer and length come from the matching mmap.
            unsafe {
                libc::munmap(ptr.as_ptr().cast(), *mapped);
            }
        }
    }
}

impl core::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("kind", &self.kind)
            .field("numa_node", &self.numa_node)
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn advise_huge_pages(ptr: *mut u8, len: usize) -> bool {
    // SAFETY: the range belongs to our live allocation; MADV_HUGEPAGE is
    // purely advisory.
    unsafe { libc::madvise(ptr.cast(), len, libc::MADV_HUGEPAGE) == 0 }
}

#[cfg(not(target_os = "linux"))]
#[allow(clippy::missing_const_for_fn)]
fn advise_huge_pages(_ptr: *mut u8, _len: usize) -> bool {
    false
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_zeroed_and_aligned() {
        let buffer = AlignedBuffer::allocate(&AllocRequest::plain(4096)).unwrap();
        assert_eq!(buffer.len(), 4096);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
        assert_eq!(buffer.as_slice().as_ptr() as usize % 64, 0);
    }

    #[test]
    fn odd_sizes_keep_their_length() {
        let mut buffer = AlignedBuffer::allocate(&AllocRequest::plain(100)).unwrap();
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.as_mut_slice().len(), 100);
        buffer.as_mut_slice()[99] = 0xff;
        assert_eq!(buffer.as_slice()[99], 0xff);
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            AlignedBuffer::allocate(&AllocRequest::plain(0)),
            Err(Error::Allocation(_))
        ));
    }

    #[test]
    fn huge_page_request_degrades_instead_of_failing() {
        let request = AllocRequest {
            size: 1 << 20,
            large_pages: true,
            one_gb_pages: false,
            numa_node: Some(0),
        };
        let buffer = AlignedBuffer::allocate(&request).unwrap();
        assert_eq!(buffer.len(), 1 << 20);
        assert_eq!(buffer.numa_node(), Some(0));
    }
}
