/// Which of the worker's standard streams a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub channel: Channel,
    pub text: String,
}

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
///
/// One framer per stream. Complete lines are returned as soon as their `\n`
/// arrives; a trailing partial line stays buffered until more bytes come in or
/// [`LineFramer::finish`] is called at end of stream.
#[derive(Debug)]
pub struct LineFramer {
    channel: Channel,
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            buf: Vec::new(),
        }
    }

    /// Bytes held back waiting for a line terminator.
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            out.push(self.make_line(&self.buf[start..end]));
            start = end + 1;
        }
        self.buf.drain(..start);
        out
    }

    /// Flushes the trailing partial line, if any. Call once the stream hit EOF.
    pub fn finish(&mut self) -> Option<Line> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(self.make_line(&rest))
    }

    fn make_line(&self, raw: &[u8]) -> Line {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        Line {
            channel: self.channel,
            // Worker logs are not guaranteed to be valid UTF-8; never fail on them.
            text: String::from_utf8_lossy(raw).into_owned(),
        }
    }
}

/// Encodes one outbound frame: the text followed by `\n`, as UTF-8 bytes.
pub fn encode_frame(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 1);
    out.extend_from_slice(text.as_bytes());
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &[u8] = b"A\nB\r\nC";

    fn texts(lines: Vec<Line>) -> Vec<String> {
        lines.into_iter().map(|l| l.text).collect()
    }

    fn feed_in_chunks(chunk_len: usize) -> Vec<String> {
        let mut framer = LineFramer::new(Channel::Stdout);
        let mut out = Vec::new();
        for chunk in INPUT.chunks(chunk_len) {
            out.extend(texts(framer.push(chunk)));
        }
        assert_eq!(out, vec!["A", "B"], "C must wait for EOF (chunk_len={chunk_len})");
        out.extend(framer.finish().map(|l| l.text));
        out
    }

    #[test]
    fn reassembles_regardless_of_chunking() {
        for chunk_len in 1..=INPUT.len() {
            assert_eq!(feed_in_chunks(chunk_len), vec!["A", "B", "C"]);
        }
    }

    #[test]
    fn cr_split_from_lf_is_still_stripped() {
        let mut framer = LineFramer::new(Channel::Stderr);
        assert!(framer.push(b"x\r").is_empty());
        let lines = framer.push(b"\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "x");
        assert_eq!(lines[0].channel, Channel::Stderr);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn empty_lines_are_yielded() {
        let mut framer = LineFramer::new(Channel::Stdout);
        assert_eq!(texts(framer.push(b"\n\r\n")), vec!["", ""]);
    }

    #[test]
    fn finish_on_empty_buffer_yields_nothing() {
        let mut framer = LineFramer::new(Channel::Stdout);
        framer.push(b"done\n");
        assert!(framer.finish().is_none());
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let text = "héllo\n".as_bytes();
        let mut framer = LineFramer::new(Channel::Stdout);
        assert!(framer.push(&text[..2]).is_empty());
        assert_eq!(texts(framer.push(&text[2..])), vec!["héllo"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut framer = LineFramer::new(Channel::Stdout);
        let lines = framer.push(b"bad\xff\n");
        assert_eq!(lines[0].text, "bad\u{fffd}");
    }

    #[test]
    fn encode_appends_newline() {
        assert_eq!(encode_frame("PAUSE"), b"PAUSE\n");
        assert_eq!(encode_frame(""), b"\n");
    }
}
