use crate::cursor::EndianCursor;
use crate::Result;
use indexmap::IndexMap;
use num::ToPrimitive;

/// Builder for the zero-terminated name table of an archive.
///
/// Names are keyed by their packed form (terminator included). With lookup
/// enabled a name that was already written returns its first offset instead
/// of being appended again.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StringPool {
    lookup: bool,
    buffer: Vec<u8>,
    offsets: IndexMap<Vec<u8>, u32>,
}

fn pack(name: &str) -> Vec<u8> {
    let mut packed = Vec::with_capacity(name.len() + 1);
    packed.extend_from_slice(name.as_bytes());
    if packed.last() != Some(&0) {
        packed.push(0);
    }
    packed
}

impl StringPool {
    pub fn new(lookup: bool) -> StringPool {
        StringPool {
            lookup,
            ..Default::default()
        }
    }

    pub fn set_lookup(&mut self, value: bool) {
        self.lookup = value
    }

    /// Add a name to the pool and return its offset from the pool start
    pub fn write(&mut self, name: &str) -> u32 {
        let packed = pack(name);
        if self.lookup {
            if let Some(offset) = self.offsets.get(&packed) {
                return *offset;
            }
        }
        let offset = self.len();
        self.buffer.extend_from_slice(&packed);
        self.offsets.insert(packed, offset);
        offset
    }

    /// Offset recorded for `name`, if it was written before. Without lookup
    /// this is the offset of the most recent copy.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.offsets.get(&pack(name)).copied()
    }

    /// Zero-pad the buffer to a multiple of 32 bytes
    pub fn align32(&mut self) {
        let len = crate::align(self.buffer.len(), 32);
        self.buffer.resize(len, 0);
    }

    pub fn len(&self) -> u32 {
        // Archive offsets are 32 bits wide; the writer rejects larger pools
        self.buffer.len().to_u32().unwrap_or(u32::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Read the name stored at `base + offset`, leaving the cursor where it was
    pub fn read_name<T: AsRef<[u8]>>(
        cursor: &mut EndianCursor<T>,
        base: u64,
        offset: u32,
    ) -> Result<String> {
        let mut guard = cursor.scoped_seek(base + offset as u64);
        guard.read_cstring()
    }
}

#[cfg(test)]
mod tests {
    use super::StringPool;
    use crate::{cursor::EndianCursor, Endian};

    #[test]
    fn dedup_returns_first_offset() {
        let mut pool = StringPool::new(true);
        assert_eq!(pool.write("."), 0);
        assert_eq!(pool.write(".."), 2);
        let first = pool.write("scene");
        let len = pool.len();
        assert_eq!(pool.write("scene"), first);
        assert_eq!(pool.len(), len);
        assert_eq!(pool.find("scene"), Some(first));
    }

    #[test]
    fn no_dedup_appends_again() {
        let mut pool = StringPool::new(false);
        let first = pool.write("scene");
        let len = pool.len();
        let second = pool.write("scene");
        assert!(second > first);
        assert!(pool.len() > len);
        assert_eq!(pool.as_bytes(), b"scene\0scene\0");
        assert_eq!(pool.find("scene"), Some(second));
    }

    #[test]
    fn already_terminated_name_is_not_packed_twice() {
        let mut pool = StringPool::new(true);
        assert_eq!(pool.write("abc\0"), 0);
        assert_eq!(pool.write("abc"), 0);
        assert_eq!(pool.as_bytes(), b"abc\0");
    }

    #[test]
    fn align32() {
        let mut pool = StringPool::new(false);
        pool.align32();
        assert_eq!(pool.len(), 0);
        for name in &["a", "bb", "ccc", "a_much_longer_name_for_testing"] {
            pool.write(name);
            let before = pool.len();
            pool.align32();
            assert_eq!(pool.len() % 32, 0);
            assert!(pool.len() - before <= 31);
        }
    }

    #[test]
    fn read_back_names() {
        let mut pool = StringPool::new(true);
        let dot = pool.write(".");
        let name = pool.write("stage.arc");
        let mut data = vec![0xAAu8; 4];
        data.extend_from_slice(pool.as_bytes());
        let mut cursor = EndianCursor::new(&data[..], Endian::Big);
        assert_eq!(StringPool::read_name(&mut cursor, 4, name).unwrap(), "stage.arc");
        assert_eq!(StringPool::read_name(&mut cursor, 4, dot).unwrap(), ".");
        assert_eq!(cursor.position(), 0);
    }
}
