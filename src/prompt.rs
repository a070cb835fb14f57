use tracing::{debug, warn};

use crate::models::TrendProfile;

const BASE_TEMPLATE_PREFIX: &str = "High-converting";

const NEGATIVE_PROMPT: &str = concat!(
    "blurry, low quality, distorted, watermark, text overlay, poor lighting, ",
    "amateur photography, cluttered composition"
);

const INDUSTRY_CONTEXTS: &[(&str, &str)] = &[
    ("fitness", "health and wellness focused"),
    ("fashion", "style and trend conscious"),
    ("food", "appetizing and fresh presentation"),
    ("beauty", "elegant and luxurious aesthetic"),
    ("electronics", "modern and tech-savvy design"),
    ("saas", "professional and solution-oriented"),
];

const LAYOUT_DESCRIPTORS: &[(&str, &str)] = &[
    ("image-centric", "product-focused composition with clean background"),
    ("text-heavy", "bold typography with prominent text overlay"),
    ("split-layout", "balanced layout with text and image sections"),
    ("overlay-text", "text overlaid on product imagery"),
];

// Keys use underscores: creative types are normalised `-` -> `_` before lookup.
const CREATIVE_DESCRIPTORS: &[(&str, &str)] = &[
    ("product_only", "minimal product showcase, clean aesthetic"),
    ("ugc", "authentic user-generated content style, casual photography"),
    ("offer_based", "promotional design with clear value proposition"),
    ("testimonial", "social proof focused, customer-centric design"),
    ("brand_story", "narrative-driven, brand heritage focused"),
];

/// Named colours in match order, with the RGB used to resolve hex tokens.
const COLOR_DESCRIPTORS: &[(&str, &str, [u8; 3])] = &[
    ("blue", "professional blue tones", [0, 0, 255]),
    ("black", "sleek black accents", [0, 0, 0]),
    ("white", "clean white backgrounds", [255, 255, 255]),
    ("red", "bold red highlights", [255, 0, 0]),
    ("green", "fresh green elements", [0, 128, 0]),
    ("yellow", "vibrant yellow accents", [255, 255, 0]),
    ("orange", "energetic orange tones", [255, 165, 0]),
    ("purple", "sophisticated purple shades", [128, 0, 128]),
    ("pink", "modern pink highlights", [255, 192, 203]),
    ("gray", "neutral gray tones", [128, 128, 128]),
];

const PLATFORM_MODIFIERS: &[(&str, &str)] = &[
    ("instagram", "square format, mobile-optimized"),
    ("facebook", "social media optimized, engaging"),
    ("tiktok", "dynamic, youth-oriented, trendy"),
    ("pinterest", "vertical format, aspirational"),
];

const QUALITY_MODIFIERS: [&str; 5] = [
    "professional advertisement photography",
    "studio lighting",
    "high resolution",
    "commercial grade",
    "marketing materials",
];

const STYLE_MODIFIERS: [&str; 5] = [
    "minimalist style",
    "bold and dynamic",
    "elegant and sophisticated",
    "modern and trendy",
    "luxury aesthetic",
];

const KEYWORD_STOPWORDS: [&str; 5] = ["the", "and", "for", "you", "your"];

const MAX_COLORS_EXAMINED: usize = 3;
const MAX_COLOR_MATCHES: usize = 2;
const MAX_KEYWORDS_EXAMINED: usize = 5;
const MAX_KEYWORDS_KEPT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub base_prompt: String,
    pub negative_prompt: String,
    /// One prompt per requested image; `variants[0]` is the base prompt.
    pub variants: Vec<String>,
}

/// Builds diffusion prompts from trend profiles. Stateless; every lookup miss
/// drops its clause instead of failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        profile: &TrendProfile,
        brand_name: Option<&str>,
        headline: Option<&str>,
        num_variants: usize,
    ) -> PromptSet {
        let base_prompt = self.build_prompt(profile, brand_name, headline);
        let variants = Self::compose_variants(&base_prompt, num_variants);
        PromptSet { base_prompt, negative_prompt: Self::negative_prompt().to_string(), variants }
    }

    pub fn build_prompt(
        &self,
        profile: &TrendProfile,
        brand_name: Option<&str>,
        headline: Option<&str>,
    ) -> String {
        // Headline goes to the manifest only, never into the diffusion prompt.
        if let Some(headline) = headline.filter(|h| !h.trim().is_empty()) {
            debug!("Headline '{}' not embedded in prompt", headline);
        }
        match Self::assemble(profile, brand_name) {
            Some(prompt) => {
                debug!("Generated prompt: {}...", prompt.chars().take(100).collect::<String>());
                prompt
            }
            None => {
                warn!("Trend profile has no industry, using generic prompt");
                Self::fallback_prompt(&profile.industry)
            }
        }
    }

    pub fn negative_prompt() -> &'static str {
        NEGATIVE_PROMPT
    }

    /// `[base, base + ", " + style_0, ...]`, exactly `n` long. Repeats the base
    /// prompt once the style table is exhausted.
    pub fn compose_variants(base_prompt: &str, n: usize) -> Vec<String> {
        (0..n)
            .map(|i| match i.checked_sub(1).and_then(|s| STYLE_MODIFIERS.get(s)) {
                Some(style) => format!("{base_prompt}, {style}"),
                None => base_prompt.to_string(),
            })
            .collect()
    }

    fn assemble(profile: &TrendProfile, brand_name: Option<&str>) -> Option<String> {
        let industry = profile.industry.trim().to_lowercase();
        if industry.is_empty() {
            return None;
        }
        let platform = match profile.platform.trim().to_lowercase() {
            p if p.is_empty() => "instagram".to_string(),
            p => p,
        };

        let mut parts: Vec<String> = vec![format!(
            "{BASE_TEMPLATE_PREFIX} {} advertisement for the {} industry",
            capitalize(&platform),
            capitalize(&industry)
        )];

        parts.extend(lookup(INDUSTRY_CONTEXTS, &industry).map(str::to_string));

        if let Some(layout) = profile.dominant_layouts.first() {
            let key = layout.trim().to_lowercase();
            parts.extend(lookup(LAYOUT_DESCRIPTORS, &key).map(str::to_string));
        }

        if let Some(creative) = profile.creative_types.first() {
            let key = creative.trim().to_lowercase().replace('-', "_");
            parts.extend(lookup(CREATIVE_DESCRIPTORS, &key).map(str::to_string));
        }

        parts.extend(color_clause(&profile.top_colors));
        parts.extend(lookup(PLATFORM_MODIFIERS, &platform).map(str::to_string));
        parts.extend(keyword_clause(&profile.top_keywords));

        if let Some(brand) = brand_name.map(str::trim).filter(|b| !b.is_empty()) {
            parts.push(format!("for {brand} brand"));
        }

        parts.extend(QUALITY_MODIFIERS.iter().map(|q| q.to_string()));
        Some(parts.join(", "))
    }

    fn fallback_prompt(industry: &str) -> String {
        let industry = match industry.trim() {
            "" => "product",
            i => i,
        };
        format!(
            "Professional advertisement for {industry} industry, \
             high quality, commercial photography"
        )
    }
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn color_clause(colors: &[String]) -> Option<String> {
    let matches: Vec<&str> = colors
        .iter()
        .take(MAX_COLORS_EXAMINED)
        .filter_map(|c| color_descriptor(c))
        .take(MAX_COLOR_MATCHES)
        .collect();
    if matches.is_empty() {
        None
    } else {
        Some(format!("color palette: {}", matches.join(", ")))
    }
}

/// Substring match in either direction against the named colours, then
/// nearest-named-colour resolution for hex tokens.
fn color_descriptor(raw: &str) -> Option<&'static str> {
    let token: String =
        raw.to_lowercase().chars().filter(|c| *c != '#' && !c.is_whitespace()).collect();
    if token.is_empty() {
        return None;
    }
    COLOR_DESCRIPTORS
        .iter()
        .find(|(name, _, _)| token.contains(name) || name.contains(token.as_str()))
        .or_else(|| {
            let rgb = parse_hex_color(raw.trim())?;
            COLOR_DESCRIPTORS.iter().min_by_key(|(_, _, reference)| color_distance(rgb, *reference))
        })
        .map(|(_, descriptor, _)| *descriptor)
}

fn parse_hex_color(raw: &str) -> Option<[u8; 3]> {
    let (digits, prefixed) = match raw.strip_prefix('#') {
        Some(rest) => (rest, true),
        None => (raw, false),
    };
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match digits.len() {
        6 => {
            let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
            Some([channel(0)?, channel(2)?, channel(4)?])
        }
        3 if prefixed => {
            let channel = |i: usize| u8::from_str_radix(&digits[i..i + 1], 16).ok().map(|v| v * 17);
            Some([channel(0)?, channel(1)?, channel(2)?])
        }
        _ => None,
    }
}

fn color_distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = i32::from(*x) - i32::from(*y);
            (d * d) as u32
        })
        .sum()
}

fn keyword_clause(keywords: &[String]) -> Option<String> {
    let kept: Vec<&str> = keywords
        .iter()
        .take(MAX_KEYWORDS_EXAMINED)
        .map(|k| k.as_str())
        .filter(|k| {
            k.chars().count() > 2 && !KEYWORD_STOPWORDS.contains(&k.to_lowercase().as_str())
        })
        .take(MAX_KEYWORDS_KEPT)
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(format!("keywords: {}", kept.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fitness_profile() -> TrendProfile {
        TrendProfile {
            industry: "fitness".into(),
            platform: "instagram".into(),
            top_colors: vec!["#0000FF".into()],
            dominant_layouts: vec!["image-centric".into()],
            creative_types: vec!["product-only".into()],
            top_keywords: vec!["summer".into(), "sale".into(), "fit".into()],
            avg_engagement_score: None,
        }
    }

    #[test]
    fn fitness_profile_builds_every_clause_in_order() {
        let set = PromptComposer::new().compose(&fitness_profile(), Some("Acme"), None, 3);
        let expected = [
            "High-converting Instagram advertisement for the Fitness industry",
            "health and wellness focused",
            "product-focused composition with clean background",
            "minimal product showcase, clean aesthetic",
            "color palette: professional blue tones",
            "square format, mobile-optimized",
            "keywords: summer, sale, fit",
            "for Acme brand",
            "professional advertisement photography",
            "studio lighting",
            "high resolution",
            "commercial grade",
            "marketing materials",
        ]
        .join(", ");
        assert_eq!(set.base_prompt, expected);
        assert_eq!(set.variants.len(), 3);
        assert_eq!(set.variants[0], set.base_prompt);
        assert!(set.variants[1].ends_with(", minimalist style"));
        assert!(set.variants[2].ends_with(", bold and dynamic"));
    }

    #[test]
    fn unknown_values_skip_their_clauses() {
        let profile = TrendProfile {
            industry: "plumbing".into(),
            platform: "myspace".into(),
            dominant_layouts: vec!["collage".into()],
            creative_types: vec!["meme".into()],
            top_colors: vec!["chartreuse".into()],
            top_keywords: vec!["an".into(), "the".into(), "You".into()],
            ..Default::default()
        };
        let prompt = PromptComposer::new().build_prompt(&profile, Some("  "), None);
        assert_eq!(
            prompt,
            concat!(
                "High-converting Myspace advertisement for the Plumbing industry, ",
                "professional advertisement photography, studio lighting, high resolution, ",
                "commercial grade, marketing materials"
            )
        );
    }

    #[test]
    fn only_first_layout_and_creative_type_are_used() {
        let profile = TrendProfile {
            industry: "food".into(),
            dominant_layouts: vec!["unknown".into(), "text-heavy".into()],
            creative_types: vec!["UGC".into(), "testimonial".into()],
            ..Default::default()
        };
        let prompt = PromptComposer::new().build_prompt(&profile, None, None);
        assert!(!prompt.contains("bold typography"));
        assert!(prompt.contains("authentic user-generated content style"));
        assert!(!prompt.contains("social proof"));
    }

    #[test]
    fn color_matching_ignores_case_and_format() {
        let expected = Some("color palette: professional blue tones".to_string());
        for raw in ["#0000FF", "blue", "Blue ", "#00f", "navyblue"] {
            assert_eq!(color_clause(&[raw.to_string()]), expected, "token {raw:?}");
        }
    }

    #[test]
    fn color_clause_keeps_two_of_first_three() {
        let colors: Vec<String> =
            ["#FF0000", "mystery", "White", "black"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            color_clause(&colors).as_deref(),
            Some("color palette: bold red highlights, clean white backgrounds")
        );
        let colors: Vec<String> = ["red", "green", "pink"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            color_clause(&colors).as_deref(),
            Some("color palette: bold red highlights, fresh green elements")
        );
    }

    #[test]
    fn hex_colors_resolve_to_nearest_name() {
        assert_eq!(color_descriptor("#F5F5F5"), Some("clean white backgrounds"));
        assert_eq!(color_descriptor("#111111"), Some("sleek black accents"));
        assert_eq!(color_descriptor("ffa500"), Some("energetic orange tones"));
        assert_eq!(color_descriptor(""), None);
        assert_eq!(color_descriptor("#"), None);
        assert_eq!(color_descriptor("#12345"), None);
    }

    #[test]
    fn keywords_are_filtered_and_limited() {
        let keywords: Vec<String> = ["the", "go", "Your", "protein", "gym", "shred", "bulk"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // Only the first five are examined: "the", "go", "Your", "protein", "gym".
        assert_eq!(keyword_clause(&keywords).as_deref(), Some("keywords: protein, gym"));
        assert_eq!(keyword_clause(&[]), None);
    }

    #[test]
    fn blank_industry_falls_back_to_generic_prompt() {
        let prompt =
            PromptComposer::new().build_prompt(&TrendProfile::default(), Some("Acme"), None);
        assert_eq!(
            prompt,
            "Professional advertisement for product industry, high quality, commercial photography"
        );
    }

    #[test]
    fn blank_platform_defaults_to_instagram() {
        let profile =
            TrendProfile { industry: "beauty".into(), platform: "".into(), ..Default::default() };
        let prompt = PromptComposer::new().build_prompt(&profile, None, None);
        assert!(prompt
            .starts_with("High-converting Instagram advertisement for the Beauty industry"));
        assert!(prompt.contains("square format, mobile-optimized"));
    }

    #[test]
    fn variants_always_have_requested_length() {
        for n in 1..=8 {
            let variants = PromptComposer::compose_variants("base", n);
            assert_eq!(variants.len(), n);
            assert_eq!(variants[0], "base");
        }
        let variants = PromptComposer::compose_variants("base", 7);
        assert_eq!(variants[5], "base, luxury aesthetic");
        assert_eq!(variants[6], "base");
        assert!(PromptComposer::compose_variants("base", 0).is_empty());
    }

    #[test]
    fn negative_prompt_is_constant() {
        let composer = PromptComposer::new();
        let a = composer.compose(&fitness_profile(), Some("Acme"), Some("Go"), 3);
        let b = composer.compose(&TrendProfile::default(), None, None, 5);
        assert_eq!(a.negative_prompt, b.negative_prompt);
        assert_eq!(a.negative_prompt, PromptComposer::negative_prompt());
    }
}
