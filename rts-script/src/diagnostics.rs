use crate::error::ScriptError;
use crate::pos::Pos;

/// Renders `err` for a terminal. `source` is the text of the file the
/// position points into; when present the offending line is quoted.
pub fn render_error(err: &ScriptError, source: Option<&str>) -> String {
    let message = err.message();
    let mut out = match err.pos() {
        Some(pos) => match source.and_then(|source| render_snippet(source, pos)) {
            Some(snippet) => format!("error: {message}\n --> {pos}\n{snippet}"),
            None => format!("error: {message}\n --> {pos}"),
        },
        None => format!("error: {message}"),
    };
    for frame in err.frames() {
        out.push_str(&format!("\n  {frame}"));
    }
    out
}

fn render_snippet(source: &str, pos: &Pos) -> Option<String> {
    let line_text = source.lines().nth((pos.line as usize).checked_sub(1)?)?;
    let pointer: String = line_text
        .chars()
        .take(pos.col.saturating_sub(1) as usize)
        .map(|ch| if ch == '\t' { '\t' } else { ' ' })
        .chain(std::iter::once('^'))
        .collect();
    let line = pos.line;
    Some(format!("  |\n{line:>3} | {line_text}\n  | {pointer}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Frame;
    use crate::error::{ErrorKind, ParseError, RuntimeError};

    #[test]
    fn parse_errors_quote_the_line() {
        let err = ScriptError::Parse(ParseError::new(
            Pos::new("req.http", 2, 9),
            "illegal token '#'",
        ));
        let rendered = render_error(&err, Some("let a = 1\nlet b = #"));
        assert_eq!(
            rendered,
            "error: illegal token '#'\n --> req.http:2:9\n  |\n  2 | let b = #\n  |         ^"
        );
    }

    #[test]
    fn runtime_errors_list_frames_innermost_first() {
        let mut err = RuntimeError::new(ErrorKind::DivisionByZero).at(&Pos::new("x.rts", 1, 12));
        err.frames = vec![
            Frame::call("inner", Pos::new("x.rts", 3, 1)),
            Frame::call("outer", Pos::new("x.rts", 5, 1)),
        ];
        let rendered = render_error(&ScriptError::Runtime(err), None);
        assert_eq!(
            rendered,
            "error: division by zero\n --> x.rts:1:12\n  at fn inner (x.rts:3:1)\n  at fn outer (x.rts:5:1)"
        );
    }

    #[test]
    fn out_of_range_lines_skip_the_snippet() {
        let err = ScriptError::Parse(ParseError::new(Pos::new("a", 9, 1), "boom"));
        assert_eq!(render_error(&err, Some("one line")), "error: boom\n --> a:9:1");
    }
}
