//! Event rendering for the terminal.

use std::io::{self, Write};

use tutor_voice::PipelineEvent;

use crate::cli::EventFormat;

/// Write `event` to `out` in `format`. Events without a rendering are skipped.
pub fn render(event: &PipelineEvent, format: EventFormat, out: &mut impl Write) -> io::Result<()> {
    match format {
        EventFormat::Json => {
            serde_json::to_writer(&mut *out, event)?;
            writeln!(out)
        }
        EventFormat::Captions => render_caption(event, out),
    }
}

fn render_caption(event: &PipelineEvent, out: &mut impl Write) -> io::Result<()> {
    match event {
        PipelineEvent::Caption { text, .. } => writeln!(out, "{text}"),
        PipelineEvent::Cue { tag, .. } => writeln!(out, "  ({tag} -> {})", tag.expression()),
        PipelineEvent::UnitSkipped { id, reason } if !reason.is_cancellation() => {
            writeln!(out, "  [skipped unit {id}: {reason}]")
        }
        PipelineEvent::Stopped => writeln!(out, "[stopped]"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use tutor_voice::{CueTag, UnitFailure, UnitId};

    use super::*;

    fn rendered(event: &PipelineEvent, format: EventFormat) -> String {
        let mut out = Vec::new();
        render(event, format, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_caption_lines() {
        let caption = PipelineEvent::Caption {
            id: UnitId(0),
            text: "Hola mundo".to_string(),
        };
        assert_eq!(rendered(&caption, EventFormat::Captions), "Hola mundo\n");

        let cue = PipelineEvent::Cue {
            id: UnitId(0),
            tag: CueTag::Explaining,
        };
        assert_eq!(
            rendered(&cue, EventFormat::Captions),
            "  (Explaining -> Talking)\n"
        );
        assert_eq!(rendered(&PipelineEvent::Drained, EventFormat::Captions), "");
    }

    #[test]
    fn test_cancelled_skips_are_silent() {
        let skipped = PipelineEvent::UnitSkipped {
            id: UnitId(4),
            reason: UnitFailure::Cancelled,
        };
        assert_eq!(rendered(&skipped, EventFormat::Captions), "");
    }

    #[test]
    fn test_json_lines() {
        let line = rendered(&PipelineEvent::Drained, EventFormat::Json);
        assert_eq!(line, "{\"type\":\"drained\"}\n");
    }
}
