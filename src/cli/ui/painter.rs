use owo_colors::{OwoColorize, Style as OwoStyle};

/// Emphasis applied to a piece of terminal text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Tone {
    Heading,
    Success,
    Warning,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> OwoStyle {
        match self {
            Self::Heading => OwoStyle::new().bold().cyan(),
            Self::Success => OwoStyle::new().bold().green(),
            Self::Warning => OwoStyle::new().bold().yellow(),
            Self::Muted => OwoStyle::new().dimmed(),
            Self::Value => OwoStyle::new().bold(),
        }
    }
}

/// Applies colour to terminal text, or passes it through when colour is off.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn paint(&self, text: impl AsRef<str>, tone: Tone) -> String {
        let text = text.as_ref();
        if self.use_colour {
            format!("{}", text.style(tone.style()))
        } else {
            text.to_string()
        }
    }

    /// Renders a boolean as a green `yes` or a yellow `no`.
    pub(crate) fn flag(&self, value: bool) -> String {
        if value {
            self.paint("yes", Tone::Success)
        } else {
            self.paint("no", Tone::Warning)
        }
    }
}
