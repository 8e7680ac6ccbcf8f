use crate::console::ConsoleSink;
use crate::framebuffer::Color;

pub const BANNER_TEXT: &str = "Welcome to the kernel !";
pub const BANNER_WIDTH: usize = 32;

/// Columns of indent that centre the banner on a console `cols` wide.
pub fn banner_indent(cols: usize) -> usize {
    cols.saturating_sub(BANNER_WIDTH) / 2
}

fn indent<S: ConsoleSink + ?Sized>(sink: &mut S, columns: usize) {
    for _ in 0..columns {
        let _ = sink.write_char(' ');
    }
}

/// Prints the welcome banner: a light grey bar with the greeting in black.
pub fn show_welcome<S: ConsoleSink + ?Sized>(sink: &mut S) {
    let pad = banner_indent(sink.columns());
    let blank = [b' '; BANNER_WIDTH];
    // Cannot fail: the array is ASCII.
    let blank = core::str::from_utf8(&blank).unwrap_or_default();

    let mut text = [b' '; BANNER_WIDTH];
    let start = BANNER_WIDTH.saturating_sub(BANNER_TEXT.len()) / 2;
    let len = BANNER_TEXT.len().min(BANNER_WIDTH);
    text[start..start + len].copy_from_slice(&BANNER_TEXT.as_bytes()[..len]);
    let text = core::str::from_utf8(&text).unwrap_or_default();

    let _ = sink.write_str("\n\n");
    indent(sink, pad);
    sink.write_colored(Color::BANNER, Color::BANNER, blank);
    let _ = sink.write_str("\n");
    indent(sink, pad);
    sink.write_colored(Color::BLACK, Color::BANNER, text);
    let _ = sink.write_str("\n");
    indent(sink, pad);
    sink.write_colored(Color::BANNER, Color::BANNER, blank);
    let _ = sink.write_str("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn banner_is_centred_on_a_1440_pixel_console() {
        assert_eq!(banner_indent(180), 74);
        assert_eq!(banner_indent(20), 0);
    }

    #[test]
    fn banner_has_three_bar_lines() {
        let mut sink = RecordingSink::new(180);
        show_welcome(&mut sink);

        let lines = sink.lines();
        let bars: Vec<&String> = lines.iter().filter(|l| !l.is_empty()).collect();
        assert_eq!(bars.len(), 3);
        for bar in &bars {
            assert_eq!(bar.len(), 74 + BANNER_WIDTH);
            assert!(bar.starts_with(&" ".repeat(74)));
        }
        assert!(bars[1].contains(BANNER_TEXT));
    }

    #[test]
    fn banner_colors() {
        let mut sink = RecordingSink::new(180);
        show_welcome(&mut sink);
        assert_eq!(sink.colored.len(), 3);
        assert_eq!(sink.colored[0].0, Color::BANNER);
        assert_eq!(sink.colored[1].0, Color::BLACK);
        assert_eq!(sink.colored[1].1, Color::BANNER);
        assert_eq!(sink.colored[1].2.trim(), BANNER_TEXT);
    }
}
