//! Rendering of raw service output into styled terminal lines.
//!
//! Services write arbitrary bytes, usually with SGR colour codes. The viewport
//! is parsed as one stream so that a colour opened on one line carries over
//! to the next, the way a real terminal would show it.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
struct Pen {
    fg: Option<Color>,
    bg: Option<Color>,
    modifiers: Modifier,
}

impl Pen {
    fn style(self) -> Style {
        let mut style = Style::default().add_modifier(self.modifiers);
        if let Some(fg) = self.fg {
            style = style.fg(fg);
        }
        if let Some(bg) = self.bg {
            style = style.bg(bg);
        }
        style
    }
}

/// Splits `bytes` into styled lines. A trailing newline does not produce an
/// empty final line.
pub fn styled_lines(bytes: &[u8]) -> Vec<Line<'static>> {
    let text = String::from_utf8_lossy(bytes);
    let mut renderer = Renderer::default();
    renderer.feed(&text);
    renderer.finish()
}

/// Same split as [`styled_lines`], with every escape sequence removed.
pub fn plain_lines(bytes: &[u8]) -> Vec<Line<'static>> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .map(|line| {
            let visible = line.rsplit('\r').next().unwrap_or(line);
            let stripped = strip_ansi_escapes::strip(visible.as_bytes());
            Line::from(String::from_utf8_lossy(&stripped).into_owned())
        })
        .collect()
}

#[derive(Default)]
struct Renderer {
    pen: Pen,
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    pending: String,
}

impl Renderer {
    fn feed(&mut self, text: &str) {
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\x1b' => match chars.peek() {
                    Some('[') => {
                        chars.next();
                        let mut params = String::new();
                        let mut terminator = None;
                        for next in chars.by_ref() {
                            if ('@'..='~').contains(&next) {
                                terminator = Some(next);
                                break;
                            }
                            params.push(next);
                        }
                        if terminator == Some('m') {
                            self.flush();
                            apply_sgr(&mut self.pen, &sgr_values(&params));
                        }
                    }
                    Some(']') => {
                        chars.next();
                        while let Some(next) = chars.next() {
                            if next == '\x07' {
                                break;
                            }
                            if next == '\x1b' && chars.peek() == Some(&'\\') {
                                chars.next();
                                break;
                            }
                        }
                    }
                    // A lone ESC is dropped.
                    _ => {}
                },
                '\n' => self.end_line(),
                // CRLF ends the line; a bare CR rewinds it.
                '\r' if chars.peek() == Some(&'\n') => {}
                '\r' => {
                    self.pending.clear();
                    self.spans.clear();
                }
                _ => self.pending.push(ch),
            }
        }
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let content = std::mem::take(&mut self.pending);
            self.spans.push(Span::styled(content, self.pen.style()));
        }
    }

    fn end_line(&mut self) {
        self.flush();
        self.lines.push(Line::from(std::mem::take(&mut self.spans)));
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush();
        if !self.spans.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.spans)));
        }
        self.lines
    }
}

fn sgr_values(params: &str) -> Vec<u16> {
    if params.is_empty() {
        return vec![0];
    }
    params
        .split(';')
        .map(|part| part.parse::<u16>().unwrap_or(0))
        .collect()
}

fn apply_sgr(pen: &mut Pen, values: &[u16]) {
    let mut rest = values;
    while let Some((&code, tail)) = rest.split_first() {
        rest = tail;
        match code {
            0 => *pen = Pen::default(),
            1..=9 => pen.modifiers.insert(attribute(code)),
            22 => pen.modifiers.remove(Modifier::BOLD | Modifier::DIM),
            23 => pen.modifiers.remove(Modifier::ITALIC),
            24 => pen.modifiers.remove(Modifier::UNDERLINED),
            25 => pen.modifiers.remove(Modifier::SLOW_BLINK | Modifier::RAPID_BLINK),
            27 => pen.modifiers.remove(Modifier::REVERSED),
            28 => pen.modifiers.remove(Modifier::HIDDEN),
            29 => pen.modifiers.remove(Modifier::CROSSED_OUT),
            30..=37 => pen.fg = Some(palette(code - 30, false)),
            39 => pen.fg = None,
            40..=47 => pen.bg = Some(palette(code - 40, false)),
            49 => pen.bg = None,
            90..=97 => pen.fg = Some(palette(code - 90, true)),
            100..=107 => pen.bg = Some(palette(code - 100, true)),
            38 | 48 => {
                let (consumed, color) = extended_color(rest);
                rest = &rest[consumed..];
                if let Some(color) = color {
                    if code == 38 {
                        pen.fg = Some(color);
                    } else {
                        pen.bg = Some(color);
                    }
                }
            }
            _ => {}
        }
    }
}

fn attribute(code: u16) -> Modifier {
    match code {
        1 => Modifier::BOLD,
        2 => Modifier::DIM,
        3 => Modifier::ITALIC,
        4 => Modifier::UNDERLINED,
        5 => Modifier::SLOW_BLINK,
        6 => Modifier::RAPID_BLINK,
        7 => Modifier::REVERSED,
        8 => Modifier::HIDDEN,
        9 => Modifier::CROSSED_OUT,
        _ => Modifier::empty(),
    }
}

/// Parses the tail of a `38;…` / `48;…` sequence. Returns how many values
/// were consumed and the colour, if it was well formed.
fn extended_color(values: &[u16]) -> (usize, Option<Color>) {
    match values {
        [5, index, ..] => (2, u8::try_from(*index).ok().map(Color::Indexed)),
        [2, r, g, b, ..] => {
            let rgb = (u8::try_from(*r), u8::try_from(*g), u8::try_from(*b));
            match rgb {
                (Ok(r), Ok(g), Ok(b)) => (4, Some(Color::Rgb(r, g, b))),
                _ => (4, None),
            }
        }
        [5] => (1, None),
        [2, ..] => (values.len(), None),
        _ => (0, None),
    }
}

fn palette(index: u16, bright: bool) -> Color {
    const NORMAL: [Color; 8] = [
        Color::Black,
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::Gray,
    ];
    const BRIGHT: [Color; 8] = [
        Color::DarkGray,
        Color::LightRed,
        Color::LightGreen,
        Color::LightYellow,
        Color::LightBlue,
        Color::LightMagenta,
        Color::LightCyan,
        Color::White,
    ];
    let table = if bright { &BRIGHT } else { &NORMAL };
    table[usize::from(index) % 8]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn plain_output_splits_on_newlines() {
        let lines = styled_lines(b"one\ntwo\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(text(&lines[0]), "one");
        assert_eq!(text(&lines[1]), "two");
        assert_eq!(lines[1].spans[0].style.fg, None);
    }

    #[test]
    fn partial_last_line_is_kept() {
        let lines = styled_lines(b"done\nloading");
        assert_eq!(lines.len(), 2);
        assert_eq!(text(&lines[1]), "loading");
    }

    #[test]
    fn colour_carries_across_lines_until_reset() {
        let lines = styled_lines(b"\x1b[32mok\nstill green\x1b[0m\nplain\n");
        assert_eq!(lines[0].spans[0].style.fg, Some(Color::Green));
        assert_eq!(lines[1].spans[0].style.fg, Some(Color::Green));
        assert_eq!(lines[2].spans[0].style.fg, None);
    }

    #[test]
    fn bold_and_extended_colours() {
        let lines = styled_lines(b"\x1b[1;38;5;120mA\x1b[48;2;1;2;3mB\x1b[22mC");
        let spans = &lines[0].spans;
        assert_eq!(spans.len(), 3);
        assert!(spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(spans[0].style.fg, Some(Color::Indexed(120)));
        assert_eq!(spans[1].style.bg, Some(Color::Rgb(1, 2, 3)));
        assert!(!spans[2].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn osc_and_cursor_sequences_are_dropped() {
        let lines = styled_lines(b"hi\x1b]0;title\x07\x1b[2Kthere");
        assert_eq!(lines.len(), 1);
        assert_eq!(text(&lines[0]), "hithere");
    }

    #[test]
    fn carriage_return_keeps_the_last_segment() {
        let lines = styled_lines(b"10%\r50%\r100%\n");
        assert_eq!(text(&lines[0]), "100%");
        let plain = plain_lines(b"10%\r100%\n");
        assert_eq!(text(&plain[0]), "100%");
    }

    #[test]
    fn crlf_line_endings_keep_their_text() {
        let lines = styled_lines(b"hello\r\n\x1b[31mworld\r\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(text(&lines[0]), "hello");
        assert_eq!(text(&lines[1]), "world");
        assert_eq!(lines[1].spans[0].style.fg, Some(Color::Red));
        let plain = plain_lines(b"hello\r\nworld\r\n");
        assert_eq!(text(&plain[0]), "hello");
        assert_eq!(text(&plain[1]), "world");

        let progress = styled_lines(b"10%\r100%\r\n");
        assert_eq!(text(&progress[0]), "100%");
    }

    #[test]
    fn plain_lines_strip_escapes() {
        let lines = plain_lines(b"\x1b[31mred\x1b[0m\nok\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(text(&lines[0]), "red");
        assert_eq!(lines[0].spans[0].style.fg, None);
    }

    #[test]
    fn malformed_extended_colour_is_ignored() {
        let mut pen = Pen::default();
        apply_sgr(&mut pen, &[38, 5]);
        assert_eq!(pen.fg, None);
        apply_sgr(&mut pen, &[38, 2, 300, 0, 0, 1]);
        assert_eq!(pen.fg, None);
        assert!(pen.modifiers.contains(Modifier::BOLD));
        assert_eq!(sgr_values(""), vec![0]);
        assert_eq!(sgr_values("1;"), vec![1, 0]);
    }
}
