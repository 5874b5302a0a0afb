//! ScreenEmulator — feeds PTY bytes through a VT100 decoder and
//! exposes the rendered grid (spec.md §4.3).
//!
//! Grounded on the `vt100` crate, the pack's standard choice for this
//! job (`examples/other_examples/manifests/lelanhus-ptybox/Cargo.toml`,
//! `shell-pool-shpool/Cargo.toml`), equivalent to the original Python
//! implementation's `pyte.Screen` + `pyte.Stream`
//! (`original_source/app/models/terminal_session.py`).

pub struct ScreenEmulator {
    parser: vt100::Parser,
}

impl std::fmt::Debug for ScreenEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScreenEmulator")
    }
}

impl ScreenEmulator {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            parser: vt100::Parser::new(rows, cols, 0),
        }
    }

    /// Advance decoder state. `vt100::Parser::process` already treats
    /// its input as a raw byte stream and recovers from malformed
    /// escape sequences; invalid UTF-8 text bytes are replaced by the
    /// parser the same way the original's
    /// `data.decode('utf-8', errors='replace')` does.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    /// Snapshot of the visible cells, one string per row.
    pub fn display(&self) -> Vec<String> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        (0..rows)
            .map(|row| {
                (0..cols)
                    .map(|col| {
                        screen
                            .cell(row, col)
                            .map(|cell| {
                                let contents = cell.contents();
                                if contents.is_empty() {
                                    ' '
                                } else {
                                    contents.chars().next().unwrap_or(' ')
                                }
                            })
                            .unwrap_or(' ')
                    })
                    .collect::<String>()
            })
            .collect()
    }

    /// Reflow the grid; content outside the new bounds is dropped.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.parser.set_size(rows, cols);
    }

    pub fn size(&self) -> (u16, u16) {
        self.parser.screen().size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeds_plain_text_into_first_row() {
        let mut emu = ScreenEmulator::new(5, 20);
        emu.feed(b"hello");
        let display = emu.display();
        assert!(display[0].starts_with("hello"));
    }

    #[test]
    fn resize_changes_reported_size() {
        let mut emu = ScreenEmulator::new(24, 80);
        emu.resize(40, 132);
        assert_eq!(emu.size(), (40, 132));
        assert_eq!(emu.display().len(), 40);
    }

    #[test]
    fn handles_invalid_utf8_without_panicking() {
        let mut emu = ScreenEmulator::new(5, 20);
        emu.feed(&[0xff, 0xfe, b'h', b'i']);
    }
}
