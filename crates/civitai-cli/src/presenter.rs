//! Line-based terminal presenter.

use civitai_core::settings::ImageSize;
use civitai_core::ui::{ImageDisplay, Presenter};
use std::io::{self, BufRead, Write};

/// Prompts on stdout and reads answers from stdin.
#[derive(Debug, Clone, Copy)]
pub struct TerminalPresenter {
    /// Terminal rows a preview may take.
    preview_rows: u16,
}

impl TerminalPresenter {
    pub fn new(image_size: ImageSize) -> Self {
        Self {
            preview_rows: image_size.rows(),
        }
    }

    fn image_line(&self, bytes: usize, display: ImageDisplay) -> Option<String> {
        match display {
            ImageDisplay::Show => Some(format!(
                "  [preview image, {} bytes, {} rows]",
                bytes, self.preview_rows
            )),
            ImageDisplay::Blockify => Some(format!(
                "  [preview image hidden behind blocks, {} rows]",
                self.preview_rows
            )),
            ImageDisplay::Hide => None,
        }
    }
}

impl Presenter for TerminalPresenter {
    fn present_choice(&self, prompt: &str, options: &[String], multi: bool) -> Vec<usize> {
        if options.is_empty() {
            return Vec::new();
        }

        println!("{}", prompt);
        for (i, option) in options.iter().enumerate() {
            println!("  {:>2}. {}", i + 1, option);
        }
        if multi {
            print!("Enter numbers separated by commas, 'all', or nothing to skip: ");
        } else {
            print!("Enter a number, or nothing to skip: ");
        }
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return Vec::new();
        }
        parse_selection(&line, options.len(), multi)
    }

    fn present_image(&self, bytes: &[u8], display: ImageDisplay) {
        if let Some(line) = self.image_line(bytes.len(), display) {
            println!("{}", line);
        }
    }
}

/// Parse "1,3", "2 4" or "all" into zero-based indices within `len`.
pub fn parse_selection(input: &str, len: usize, multi: bool) -> Vec<usize> {
    let input = input.trim();
    if multi && input.eq_ignore_ascii_case("all") {
        return (0..len).collect();
    }

    let mut picked: Vec<usize> = Vec::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        let Ok(n) = token.trim().parse::<usize>() else {
            continue;
        };
        if (1..=len).contains(&n) && !picked.contains(&(n - 1)) {
            picked.push(n - 1);
        }
    }

    if !multi {
        picked.truncate(1);
    }
    picked
}
