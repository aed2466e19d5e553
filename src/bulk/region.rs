use std::collections::HashMap;

use crate::bulk::{AccessMode, BulkDescriptor};
use crate::error::{DimError, Result};

/// A registered buffer together with its descriptor.
#[derive(Debug)]
pub struct BulkRegion {
    descriptor: BulkDescriptor,
    data: Vec<u8>,
}

impl BulkRegion {
    pub fn new(id: u64, data: Vec<u8>, mode: AccessMode) -> Self {
        Self {
            descriptor: BulkDescriptor {
                id,
                size: data.len() as u64,
                mode,
            },
            data,
        }
    }

    pub fn descriptor(&self) -> BulkDescriptor {
        self.descriptor
    }

    /// Validate an access without performing it.
    pub fn check(&self, offset: u64, length: u64, write: bool) -> Result<()> {
        if write && !self.descriptor.mode.writable() {
            return Err(self.denied("write"));
        }
        if !write && !self.descriptor.mode.readable() {
            return Err(self.denied("read"));
        }
        self.range(offset, length).map(|_| ())
    }

    /// Borrow `length` bytes at `offset`; the region must be readable.
    pub fn read(&self, offset: u64, length: u64) -> Result<&[u8]> {
        if !self.descriptor.mode.readable() {
            return Err(self.denied("read"));
        }
        let range = self.range(offset, length)?;
        Ok(&self.data[range])
    }

    /// Overwrite bytes at `offset`; the region must be writable.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if !self.descriptor.mode.writable() {
            return Err(self.denied("write"));
        }
        let range = self.range(offset, bytes.len() as u64)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, offset: u64, length: u64) -> Result<std::ops::Range<usize>> {
        let end = offset.checked_add(length);
        match end {
            Some(end) if end <= self.descriptor.size => Ok(offset as usize..end as usize),
            _ => Err(DimError::OutOfBounds {
                descriptor: self.descriptor.id,
                offset,
                length,
                size: self.descriptor.size,
            }),
        }
    }

    fn denied(&self, operation: &'static str) -> DimError {
        DimError::AccessDenied {
            descriptor: self.descriptor.id,
            mode: self.descriptor.mode,
            operation,
        }
    }
}

/// Allocate a zero-filled buffer of a caller-declared size.
///
/// Fails instead of aborting when the allocator cannot satisfy the request.
pub fn zeroed_buffer(size: u64, limit: u64) -> Result<Vec<u8>> {
    if size > limit {
        return Err(DimError::Allocation(size));
    }
    let len = usize::try_from(size).map_err(|_| DimError::Allocation(size))?;
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| DimError::Allocation(size))?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// Live registrations of one side of a connection.
#[derive(Debug, Default)]
pub struct BulkRegistry {
    regions: HashMap<u64, BulkRegion>,
    next_id: u64,
}

impl BulkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, data: Vec<u8>, mode: AccessMode) -> BulkDescriptor {
        self.next_id = self.next_id.wrapping_add(1);
        let region = BulkRegion::new(self.next_id, data, mode);
        let descriptor = region.descriptor();
        self.regions.insert(descriptor.id, region);
        descriptor
    }

    pub fn get(&self, id: u64) -> Result<&BulkRegion> {
        self.regions.get(&id).ok_or(DimError::UnknownDescriptor(id))
    }

    pub fn get_mut(&mut self, id: u64) -> Result<&mut BulkRegion> {
        self.regions
            .get_mut(&id)
            .ok_or(DimError::UnknownDescriptor(id))
    }

    /// Deregister a region and return its bytes.
    pub fn release(&mut self, id: u64) -> Option<Vec<u8>> {
        self.regions.remove(&id).map(BulkRegion::into_inner)
    }

    /// Number of regions still registered.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_read_only_region_rejects_writes() {
        let mut region = BulkRegion::new(1, b"hello".to_vec(), AccessMode::ReadOnly);
        assert_eq!(region.read(1, 3).unwrap(), b"ell");
        assert!(matches!(
            region.write(0, b"x"),
            Err(DimError::AccessDenied {
                operation: "write",
                ..
            })
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_write_only_region_rejects_reads() {
        let mut region = BulkRegion::new(2, vec![0; 4], AccessMode::WriteOnly);
        region.write(2, b"ab").unwrap();
        assert!(matches!(
            region.read(0, 4),
            Err(DimError::AccessDenied { operation: "read", .. })
        ));
        assert_eq!(region.into_inner(), vec![0, 0, b'a', b'b']);
    }

    #[test]
    fn test_out_of_bounds_ranges() {
        let mut region = BulkRegion::new(3, vec![0; 4], AccessMode::ReadWrite);
        assert!(matches!(
            region.read(3, 2),
            Err(DimError::OutOfBounds { size: 4, .. })
        ));
        assert!(matches!(
            region.write(u64::MAX, b"a"),
            Err(DimError::OutOfBounds { .. })
        ));
        assert!(region.read(4, 0).is_ok());
    }

    #[test]
    fn test_check_matches_read_and_write_rules() {
        let region = BulkRegion::new(4, vec![0; 8], AccessMode::WriteOnly);
        assert!(region.check(0, 8, true).is_ok());
        assert!(region.check(0, 8, false).is_err());
        assert!(region.check(4, 5, true).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zeroed_buffer_respects_limit() {
        assert_eq!(zeroed_buffer(5, 16).unwrap(), vec![0; 5]);
        assert!(zeroed_buffer(0, 16).unwrap().is_empty());
        assert!(matches!(
            zeroed_buffer(17, 16),
            Err(DimError::Allocation(17))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_registry_release_returns_bytes() {
        let mut registry = BulkRegistry::new();
        let a = registry.register(b"one".to_vec(), AccessMode::ReadOnly);
        let b = registry.register(vec![0; 8], AccessMode::ReadWrite);
        assert_ne!(a.id, b.id);
        assert_eq!(b.size, 8);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.release(a.id).unwrap(), b"one");
        assert!(registry.release(a.id).is_none());
        assert!(matches!(
            registry.get(a.id),
            Err(DimError::UnknownDescriptor(_))
        ));
        assert_eq!(registry.len(), 1);
    }
}
