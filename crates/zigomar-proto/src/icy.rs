//! ICY (Shoutcast/Icecast in-band metadata) helpers.
//!
//! A stream served with `icy-metaint: N` interleaves `N` audio bytes, one
//! length byte `L`, then `L * 16` bytes of metadata text such as
//! `StreamTitle='Artist - Title';`.

/// Largest metadata block the protocol can express (255 * 16).
pub const MAX_META_LEN: usize = 255 * 16;

/// Split `"Artist - Title"` on the first `" - "`.
///
/// Returns `(title, artist)`; without a delimiter the whole string is the
/// title and there is no artist.
pub fn parse_icy(icy: &str) -> (Option<String>, Option<String>) {
    let s = icy.trim();
    if let Some(pos) = s.find(" - ") {
        let artist = s[..pos].trim().to_string();
        let title = s[pos + 3..].trim().to_string();
        (
            Some(title).filter(|t| !t.is_empty()),
            Some(artist).filter(|a| !a.is_empty()),
        )
    } else {
        (Some(s.to_string()).filter(|t| !t.is_empty()), None)
    }
}

/// Extract `StreamTitle` from a raw metadata block (NUL padded).
pub fn parse_stream_title(meta: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(meta)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    if text.is_empty() {
        return None;
    }

    for (open, close) in [("StreamTitle='", "';"), ("StreamTitle=\"", "\";")] {
        if let Some(start) = text.find(open) {
            let rest = &text[start + open.len()..];
            // A trailing block may lack the `;`
            let end = rest.find(close).or_else(|| rest.rfind(&close[..1]));
            if let Some(end) = end {
                let title = rest[..end].trim();
                return (!title.is_empty()).then(|| title.to_string());
            }
        }
    }

    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Audio { remaining: usize },
    Length,
    Meta { remaining: usize },
}

/// Incremental splitter for an ICY byte stream.  Feed it chunks as they
/// arrive; it hands back every complete metadata block.
#[derive(Debug)]
pub struct IcyDemuxer {
    metaint: usize,
    phase: Phase,
    meta: Vec<u8>,
    audio_bytes: usize,
    consumed: usize,
}

impl IcyDemuxer {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            phase: Phase::Audio { remaining: metaint },
            meta: Vec::new(),
            audio_bytes: 0,
            consumed: 0,
        }
    }

    /// Byte offset by which the first metadata slot has been read in full,
    /// whatever its length.
    pub fn first_block_limit(&self) -> usize {
        self.metaint + 1 + MAX_META_LEN
    }

    /// True once the first slot has gone by without a non-empty block.
    pub fn past_first_block(&self) -> bool {
        self.consumed >= self.first_block_limit()
    }

    /// Audio bytes skipped so far.
    pub fn audio_bytes(&self) -> usize {
        self.audio_bytes
    }

    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Vec<u8>> {
        self.consumed += chunk.len();
        let mut blocks = Vec::new();
        while !chunk.is_empty() {
            match self.phase {
                Phase::Audio { remaining } => {
                    let take = remaining.min(chunk.len());
                    self.audio_bytes += take;
                    chunk = &chunk[take..];
                    self.phase = if take == remaining {
                        Phase::Length
                    } else {
                        Phase::Audio {
                            remaining: remaining - take,
                        }
                    };
                }
                Phase::Length => {
                    let len = chunk[0] as usize * 16;
                    chunk = &chunk[1..];
                    self.phase = if len == 0 {
                        Phase::Audio {
                            remaining: self.metaint,
                        }
                    } else {
                        self.meta.clear();
                        self.meta.reserve(len.min(MAX_META_LEN));
                        Phase::Meta { remaining: len }
                    };
                }
                Phase::Meta { remaining } => {
                    let take = remaining.min(chunk.len());
                    self.meta.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];
                    if take == remaining {
                        blocks.push(std::mem::take(&mut self.meta));
                        self.phase = Phase::Audio {
                            remaining: self.metaint,
                        };
                    } else {
                        self.phase = Phase::Meta {
                            remaining: remaining - take,
                        };
                    }
                }
            }
        }
        blocks
    }
}
