use std::{
    fmt, fs,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    str::FromStr,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

use crate::error::TraceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Instruction,
    Load,
    Store,
    Modify,
}

impl Kind {
    fn from_char(c: char) -> Option<Kind> {
        match c {
            'I' => Some(Kind::Instruction),
            'L' => Some(Kind::Load),
            'S' => Some(Kind::Store),
            'M' => Some(Kind::Modify),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Kind::Instruction => 'I',
            Kind::Load => 'L',
            Kind::Store => 'S',
            Kind::Modify => 'M',
        }
    }
}

/// One decoded trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub kind: Kind,
    pub addr: u64,
    /// Bytes touched. Carried through for the verbose trace only.
    pub size: u32,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:x},{}", self.kind.as_char(), self.addr, self.size)
    }
}

impl FromStr for Access {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let mut chars = line.chars();
        let op = chars.next().ok_or("empty record")?;
        let kind = Kind::from_char(op).ok_or_else(|| format!("unknown operation {op:?}"))?;

        let rest = chars.as_str();
        if !rest.starts_with(char::is_whitespace) {
            return Err(format!("expected whitespace after {op:?}"));
        }
        let (addr, size) = rest
            .trim_start()
            .split_once(',')
            .ok_or("expected <address>,<size>")?;

        let addr = addr.trim();
        let addr = addr
            .strip_prefix("0x")
            .or_else(|| addr.strip_prefix("0X"))
            .unwrap_or(addr);
        let addr =
            u64::from_str_radix(addr, 16).map_err(|e| format!("bad address {addr:?}: {e}"))?;
        let size = size
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("bad size {:?}: {e}", size.trim()))?;

        Ok(Access { kind, addr, size })
    }
}

/// Lazily parses every non-blank line of `reader`.
pub fn parse<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Access, TraceError>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(line.parse::<Access>().map_err(|reason| TraceError::Parse {
                line: idx + 1,
                reason,
            })),
            Err(err) => Some(Err(TraceError::Io(err))),
        })
}

fn open(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let file = fs::File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "xz") {
        Ok(Box::new(XzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Blocks of decoded records, produced by a background reader thread.
///
/// An `Err` is always the last item received.
pub struct Trace {
    pub rec: Receiver<Result<Vec<Access>, TraceError>>,
    _thread: JoinHandle<()>,
}

impl Trace {
    pub fn read(
        path: PathBuf,
        events_per_block: usize,
        blocks_per_queue: usize,
    ) -> Result<Trace, TraceError> {
        let stream = open(&path)?;
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);
        let events_per_block = events_per_block.max(1);

        let t = thread::spawn(move || Trace::run_thread(stream, events_per_block, sender));

        Ok(Trace {
            rec: receiver,
            _thread: t,
        })
    }

    fn run_thread(
        stream: Box<dyn Read + Send>,
        events_per_block: usize,
        queue: Sender<Result<Vec<Access>, TraceError>>,
    ) {
        let mut records = parse(BufReader::new(stream));
        loop {
            let mut buffer = Vec::with_capacity(events_per_block);
            let mut failure = None;
            for record in records.by_ref().take(events_per_block) {
                match record {
                    Ok(access) => buffer.push(access),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            let done = failure.is_some() || buffer.len() < events_per_block;
            if !buffer.is_empty() && queue.send(Ok(buffer)).is_err() {
                return;
            }
            if let Some(err) = failure {
                let _ = queue.send(Err(err));
            }
            if done {
                return;
            }
        }
    }
}
