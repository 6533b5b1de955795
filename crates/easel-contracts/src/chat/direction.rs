use std::fmt;

use serde::{Deserialize, Serialize};

/// Which edge of the canvas the user asked to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutpaintDirection {
    Left,
    Right,
    Top,
    Bottom,
    All,
}

struct DirectionKeywords {
    direction: OutpaintDirection,
    /// Whole English words.
    words: &'static [&'static str],
    /// CJK phrases matched as substrings. Single characters such as 上 or 下
    /// are left out because they occur in non-directional words (加上, 一下).
    phrases: &'static [&'static str],
}

const DIRECTION_KEYWORDS: &[DirectionKeywords] = &[
    DirectionKeywords {
        direction: OutpaintDirection::Left,
        words: &["left", "leftward", "leftwards"],
        phrases: &["左边", "左侧", "向左", "左面"],
    },
    DirectionKeywords {
        direction: OutpaintDirection::Right,
        words: &["right", "rightward", "rightwards"],
        phrases: &["右边", "右侧", "向右", "右面"],
    },
    DirectionKeywords {
        direction: OutpaintDirection::Top,
        words: &["top", "upward", "upwards", "above"],
        phrases: &["上方", "上面", "上边", "顶部", "向上"],
    },
    DirectionKeywords {
        direction: OutpaintDirection::Bottom,
        words: &["bottom", "downward", "downwards", "below"],
        phrases: &["下方", "下面", "下边", "底部", "向下"],
    },
    DirectionKeywords {
        direction: OutpaintDirection::All,
        words: &["all", "around", "everywhere"],
        phrases: &["四周", "周围", "四边"],
    },
];

impl OutpaintDirection {
    /// Keyword match over free text. The first direction in left, right,
    /// top, bottom, all order with a keyword present wins; no keyword means
    /// `All`.
    pub fn parse_hint(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        DIRECTION_KEYWORDS
            .iter()
            .find(|entry| {
                entry.words.iter().any(|keyword| words.contains(keyword))
                    || entry.phrases.iter().any(|phrase| lowered.contains(phrase))
            })
            .map(|entry| entry.direction)
            .unwrap_or(Self::All)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::All => "all",
        }
    }
}

impl fmt::Display for OutpaintDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-edge canvas multipliers. `1.0` leaves an edge untouched; `1.2` grows
/// the canvas on that side by 20% of the source size along that axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeScales {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl EdgeScales {
    pub const DEFAULT_SCALE: f64 = 1.2;

    pub fn uniform(scale: f64) -> Self {
        Self {
            top: scale,
            bottom: scale,
            left: scale,
            right: scale,
        }
    }

    /// Puts `scale` on the named edge and leaves the others at `1.0`.
    /// `All` grows every edge.
    pub fn for_direction(direction: OutpaintDirection, scale: f64) -> Self {
        let mut scales = Self::uniform(1.0);
        match direction {
            OutpaintDirection::Left => scales.left = scale,
            OutpaintDirection::Right => scales.right = scale,
            OutpaintDirection::Top => scales.top = scale,
            OutpaintDirection::Bottom => scales.bottom = scale,
            OutpaintDirection::All => scales = Self::uniform(scale),
        }
        scales
    }

    pub fn validate(&self) -> Result<(), String> {
        for (edge, value) in [
            ("top", self.top),
            ("bottom", self.bottom),
            ("left", self.left),
            ("right", self.right),
        ] {
            if !value.is_finite() || value < 1.0 {
                return Err(format!(
                    "{edge} scale must be a finite multiplier >= 1.0 (got {value})"
                ));
            }
        }
        Ok(())
    }
}

impl Default for EdgeScales {
    fn default() -> Self {
        Self::uniform(Self::DEFAULT_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::{EdgeScales, OutpaintDirection};

    #[test]
    fn parse_hint_matches_english_and_cjk_keywords() {
        assert_eq!(
            OutpaintDirection::parse_hint("extend the LEFT side"),
            OutpaintDirection::Left
        );
        assert_eq!(
            OutpaintDirection::parse_hint("扩展这张图像的右侧"),
            OutpaintDirection::Right
        );
        assert_eq!(
            OutpaintDirection::parse_hint("more sky on top"),
            OutpaintDirection::Top
        );
        assert_eq!(
            OutpaintDirection::parse_hint("grow the bottom edge"),
            OutpaintDirection::Bottom
        );
        assert_eq!(
            OutpaintDirection::parse_hint("把背景向周围扩大"),
            OutpaintDirection::All
        );
    }

    #[test]
    fn parse_hint_defaults_to_all_and_respects_priority() {
        assert_eq!(
            OutpaintDirection::parse_hint("make it wider"),
            OutpaintDirection::All
        );
        assert_eq!(
            OutpaintDirection::parse_hint("right then left"),
            OutpaintDirection::Left
        );
    }

    #[test]
    fn parse_hint_ignores_keywords_inside_other_words() {
        for text in [
            "make the whole scene brighter and wider",
            "帮我扩展一下这张图",
            "给这张图片加上更多背景",
            "stop the bottomless scroll",
            "upholstery on the sofa",
        ] {
            assert_eq!(OutpaintDirection::parse_hint(text), OutpaintDirection::All, "{text}");
        }
        assert_eq!(
            OutpaintDirection::parse_hint("extend it a bit to the right, please"),
            OutpaintDirection::Right
        );
        assert_eq!(
            OutpaintDirection::parse_hint("在图片下方加上草地"),
            OutpaintDirection::Bottom
        );
        assert_eq!(
            OutpaintDirection::parse_hint("把天空向上延伸一下"),
            OutpaintDirection::Top
        );
    }

    #[test]
    fn direction_biases_only_the_named_edge() {
        let scales = EdgeScales::for_direction(OutpaintDirection::Right, 1.5);
        assert_eq!(scales.right, 1.5);
        assert_eq!(scales.left, 1.0);
        assert_eq!(scales.top, 1.0);
        assert_eq!(scales.bottom, 1.0);
        assert_eq!(
            EdgeScales::for_direction(OutpaintDirection::All, 1.2),
            EdgeScales::default()
        );
    }

    #[test]
    fn validate_rejects_shrinking_or_non_finite_scales() {
        assert!(EdgeScales::default().validate().is_ok());
        assert!(EdgeScales::uniform(1.0).validate().is_ok());
        let mut scales = EdgeScales::default();
        scales.left = 0.9;
        assert!(scales.validate().unwrap_err().contains("left"));
        scales.left = f64::NAN;
        assert!(scales.validate().is_err());
    }
}
