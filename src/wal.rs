use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::time::Instant;
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only write-ahead log of store events.
///
/// Each entry is framed as `[u32 LE: len][bincode: Event][u32 LE: crc32]`,
/// where `len` counts the payload only. A torn or corrupt tail (crash mid-write)
/// ends replay at the last good entry.
pub struct Wal {
    file: File,
    path: PathBuf,
    appends_since_compact: u64,
    /// Set when a failed append could not be rolled back. Appends are refused
    /// until compaction rewrites the log.
    failed: Option<String>,
}

/// Events are a few dozen bytes; a larger length prefix is corruption.
const MAX_FRAME_LEN: u32 = 1 << 20;

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read one frame and its size in bytes. `Ok(None)` at end of log or at the
/// first damaged entry.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word);
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let size = payload.len() as u64 + 8;
    Ok(bincode::deserialize(&payload).ok().map(|event| (event, size)))
}

/// Every intact event, plus the byte length of the intact prefix.
fn read_log(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid = 0u64;
    while let Some((event, size)) = read_frame(&mut reader)? {
        events.push(event);
        valid += size;
    }
    Ok((events, valid))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: open_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            failed: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Append one event and fsync before returning. On error the file is cut
    /// back to its previous length, so a rejected event never reaches replay.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if let Some(reason) = &self.failed {
            return Err(io::Error::other(format!(
                "log disabled after failed rollback: {reason}"
            )));
        }
        let start = Instant::now();
        let mut frame = Vec::new();
        write_frame(&mut frame, event)?;

        let before = self.file.metadata()?.len();
        if let Err(e) = self.file.write_all(&frame).and_then(|()| self.file.sync_all()) {
            self.rollback(before);
            return Err(e);
        }
        self.appends_since_compact += 1;
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Truncate to `len`. If that fails the tail is unknown: disable appends.
    fn rollback(&mut self, len: u64) {
        if let Err(e) = self.file.set_len(len).and_then(|()| self.file.sync_all()) {
            tracing::error!("cannot roll back {}: {e}", self.path.display());
            self.failed = Some(e.to_string());
        }
    }

    /// Replace the log with `events`: write a synced temp file, rename it over
    /// the log, then reopen for appending.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_frame(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.file = open_append(&self.path)?;
        self.appends_since_compact = 0;
        self.failed = None;
        Ok(())
    }

    /// Read every intact event from the log at `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_log(path).map(|(events, _)| events)
    }

    /// Replay, then cut off any damaged tail so later appends follow the last
    /// intact entry instead of sitting behind garbage.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid) = read_log(path)?;
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > valid {
                tracing::warn!(
                    "truncating {} damaged bytes from {}",
                    meta.len() - valid,
                    path.display()
                );
                OpenOptions::new().write(true).open(path)?.set_len(valid)?;
            }
        }
        Ok(events)
    }
}
