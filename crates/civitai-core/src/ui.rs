//! Presentation capability used by the core.
//!
//! Prompts and image rendering belong to the front end; the core only asks
//! through [`Presenter`] so it runs headless in tests.

use crate::catalog::NsfwLevel;
use crate::settings::ImageFilter;

/// How an image should be shown under the current filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDisplay {
    Show,
    /// Render pixelated.
    Blockify,
    Hide,
}

impl ImageFilter {
    /// Display decision for an image of the given maturity.
    pub fn decide(&self, level: NsfwLevel) -> ImageDisplay {
        match (self, level) {
            (ImageFilter::AllowAll, _) | (_, NsfwLevel::None) => ImageDisplay::Show,
            (ImageFilter::BlockNsfw, NsfwLevel::Soft) => ImageDisplay::Blockify,
            (ImageFilter::BlockNsfw, _) => ImageDisplay::Hide,
            (ImageFilter::Blockify, _) => ImageDisplay::Blockify,
        }
    }
}

/// Front-end capability for choices and images.
pub trait Presenter: Send + Sync {
    /// Ask the user to pick from `options`; returns the chosen indices.
    ///
    /// With `multi` false at most one index is returned. An empty result
    /// means nothing was chosen.
    fn present_choice(&self, prompt: &str, options: &[String], multi: bool) -> Vec<usize>;

    /// Show an image already fetched by the caller.
    fn present_image(&self, bytes: &[u8], display: ImageDisplay);
}

/// Presenter that accepts every option and shows nothing.
///
/// Used for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Presenter for AcceptAll {
    fn present_choice(&self, _prompt: &str, options: &[String], multi: bool) -> Vec<usize> {
        if multi {
            (0..options.len()).collect()
        } else {
            (0..options.len().min(1)).collect()
        }
    }

    fn present_image(&self, _bytes: &[u8], _display: ImageDisplay) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_nsfw_filter() {
        let filter = ImageFilter::BlockNsfw;
        assert_eq!(filter.decide(NsfwLevel::None), ImageDisplay::Show);
        assert_eq!(filter.decide(NsfwLevel::Soft), ImageDisplay::Blockify);
        assert_eq!(filter.decide(NsfwLevel::Mature), ImageDisplay::Hide);
        assert_eq!(filter.decide(NsfwLevel::X), ImageDisplay::Hide);
    }

    #[test]
    fn test_blockify_and_allow_all_filters() {
        assert_eq!(ImageFilter::Blockify.decide(NsfwLevel::None), ImageDisplay::Show);
        assert_eq!(ImageFilter::Blockify.decide(NsfwLevel::X), ImageDisplay::Blockify);
        assert_eq!(ImageFilter::AllowAll.decide(NsfwLevel::X), ImageDisplay::Show);
    }

    #[test]
    fn test_accept_all() {
        let options = vec!["a".to_string(), "b".to_string()];
        assert_eq!(AcceptAll.present_choice("pick", &options, true), vec![0, 1]);
        assert_eq!(AcceptAll.present_choice("pick", &options, false), vec![0]);
        assert!(AcceptAll.present_choice("pick", &[], false).is_empty());
    }
}
