use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 16; // 8 bytes for first_index + 8 bytes for entry_count
const ENTRY_HEADER_SIZE: u64 = 8; // 8 bytes for entry size

/// Append-only file of length-prefixed entries behind a fixed header.
///
/// Entries are numbered from `first_index`. A trailing entry that was only
/// partly written is cut off when the segment is opened.
#[derive(Debug)]
pub struct Segment {
    file: File,
    first_index: u64,
    entry_count: u64,
    path: PathBuf,
    entry_positions: BTreeMap<u64, u64>, // index -> file position
    broken: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentHeader {
    first_index: u64,
    entry_count: u64,
}

impl Segment {
    pub fn open<P: AsRef<Path>>(path: P, first_index: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut segment = Segment {
            file,
            first_index,
            entry_count: 0,
            path: path.as_ref().to_path_buf(),
            entry_positions: BTreeMap::new(),
            broken: false,
        };

        if segment.file.metadata()?.len() < HEADER_SIZE {
            segment.file.set_len(0)?;
            segment.write_header()?;
        } else {
            segment.read_header()?;
            segment.rebuild_entry_positions()?;
        }

        Ok(segment)
    }

    fn write_header(&mut self) -> io::Result<()> {
        let header = SegmentHeader {
            first_index: self.first_index,
            entry_count: self.entry_count,
        };

        let header_bytes =
            bincode::serialize(&header).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_header(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut header_bytes = vec![0u8; HEADER_SIZE as usize];
        self.file.read_exact(&mut header_bytes)?;

        let header: SegmentHeader = bincode::deserialize(&header_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.first_index = header.first_index;
        self.entry_count = header.entry_count;
        Ok(())
    }

    fn read_entry_header(&mut self) -> io::Result<u64> {
        let mut size_bytes = [0u8; 8];
        self.file.read_exact(&mut size_bytes)?;
        Ok(u64::from_le_bytes(size_bytes))
    }

    /// Scans the file; the entries found win over the header count
    fn rebuild_entry_positions(&mut self) -> io::Result<()> {
        self.entry_positions.clear();
        let len = self.file.metadata()?.len();
        let mut pos = HEADER_SIZE;
        let mut count = 0;

        while pos + ENTRY_HEADER_SIZE <= len {
            self.file.seek(SeekFrom::Start(pos))?;
            let entry_size = self.read_entry_header()?;
            if pos + ENTRY_HEADER_SIZE + entry_size > len {
                break;
            }
            self.entry_positions.insert(self.first_index + count, pos);
            count += 1;
            pos += ENTRY_HEADER_SIZE + entry_size;
        }

        if pos < len {
            log::warn!(
                "segment {}: dropping {} bytes of torn tail",
                self.path.display(),
                len - pos
            );
            self.file.set_len(pos)?;
        }
        if count != self.entry_count {
            self.entry_count = count;
            self.write_header()?;
        }
        Ok(())
    }

    /// Appends entries and syncs them to disk. Returns the index of the last one.
    ///
    /// A failed append is rolled back: the file is cut to its previous length
    /// and no entry of the batch survives a reopen. If the rollback itself
    /// fails the segment refuses further appends until it is reopened.
    pub fn append(&mut self, entries: &[Vec<u8>]) -> io::Result<u64> {
        if self.broken {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("segment {} needs reopening after a failed rollback", self.path.display()),
            ));
        }

        let start = self.file.seek(SeekFrom::End(0))?;
        let count = self.entry_count;
        match self.write_entries(start, entries) {
            Ok(()) => Ok(self.last_index()),
            Err(e) => {
                self.rollback(start, count);
                Err(e)
            }
        }
    }

    fn write_entries(&mut self, mut pos: u64, entries: &[Vec<u8>]) -> io::Result<()> {
        for entry in entries {
            let entry_size = entry.len() as u64;
            self.file.write_all(&entry_size.to_le_bytes())?;
            self.file.write_all(entry)?;

            let entry_index = self.first_index + self.entry_count;
            self.entry_positions.insert(entry_index, pos);
            self.entry_count += 1;
            pos += ENTRY_HEADER_SIZE + entry_size;
        }

        self.write_header()?;
        self.file.sync_data()
    }

    fn rollback(&mut self, len: u64, count: u64) {
        self.entry_positions.split_off(&(self.first_index + count));
        self.entry_count = count;
        let restored = self
            .file
            .set_len(len)
            .and_then(|_| self.write_header())
            .and_then(|_| self.file.sync_data());
        if let Err(e) = restored {
            log::error!(
                "segment {}: rollback to {} bytes failed: {}",
                self.path.display(),
                len,
                e
            );
            self.broken = true;
        }
    }

    pub fn read_entry(&mut self, index: u64) -> io::Result<Vec<u8>> {
        let pos = *self.entry_positions.get(&index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Index out of range")
        })?;

        self.file.seek(SeekFrom::Start(pos))?;
        let entry_size = self.read_entry_header()?;

        let mut entry = vec![0u8; entry_size as usize];
        self.file.read_exact(&mut entry)?;
        Ok(entry)
    }

    pub fn read_all(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let indexes: Vec<u64> = self.entry_positions.keys().copied().collect();
        indexes.into_iter().map(|i| self.read_entry(i)).collect()
    }

    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Index of the newest entry, or `first_index - 1` when empty
    pub fn last_index(&self) -> u64 {
        (self.first_index + self.entry_count).saturating_sub(1)
    }

    pub fn len(&self) -> u64 {
        self.entry_count
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}
