use super::compose::word_count;

/// Descriptive filler appended, in this order, to prompts below their word floor.
pub const PADDING_PHRASES: &[&str] = &[
    "highly detailed",
    "intricate shading",
    "volumetric lighting",
    "dramatic contrast",
    "cinematic composition",
    "professional rendering",
    "realistic materials",
    "coherent color palette",
    "rich textures",
    "studio quality",
    "ultra sharp focus",
    "depth and dimension",
    "natural shadows",
    "refined highlights",
    "polished finish",
    "balanced framing",
    "clean readable shapes",
    "subtle rim light",
    "crisp edges",
    "consistent art direction",
    "vivid accents",
    "soft ambient occlusion",
    "high dynamic range",
    "fine surface detail",
    "harmonious lighting",
    "game-ready asset",
    "carefully layered depth",
    "smooth gradients",
    "strong focal point",
    "masterful craftsmanship",
];

/// Number of words the whole vocabulary can add.
pub fn padding_capacity() -> usize {
    PADDING_PHRASES.iter().map(|phrase| word_count(phrase)).sum()
}

/// Appends phrases until `prompt` has at least `min_words` words or the
/// vocabulary runs out. The input is always an unbroken prefix of the output.
pub fn pad_to_min_words(prompt: String, min_words: usize) -> String {
    let mut count = word_count(&prompt);
    if count >= min_words {
        return prompt;
    }

    let mut extra: Vec<&str> = Vec::new();
    for phrase in PADDING_PHRASES {
        if count >= min_words {
            break;
        }
        extra.push(phrase);
        count += word_count(phrase);
    }
    if extra.is_empty() {
        return prompt;
    }
    format!("{prompt}, {}", extra.join(", "))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn vocabulary_has_no_duplicates() {
        let unique: HashSet<&str> = PADDING_PHRASES.iter().copied().collect();
        assert_eq!(unique.len(), PADDING_PHRASES.len());
    }

    #[test]
    fn padding_reaches_floor_and_keeps_prefix() {
        for min_words in 1..=padding_capacity() {
            let padded = pad_to_min_words("red gem".to_string(), min_words);
            assert!(padded.starts_with("red gem"));
            assert!(
                word_count(&padded) >= min_words,
                "min_words={min_words} padded={padded}"
            );
        }
    }

    #[test]
    fn padding_stops_as_soon_as_floor_is_met() {
        let padded = pad_to_min_words("a b c".to_string(), 5);
        assert_eq!(padded, "a b c, highly detailed");
        let padded = pad_to_min_words("a b c".to_string(), 6);
        assert_eq!(padded, "a b c, highly detailed, intricate shading");
    }

    #[test]
    fn padding_never_repeats_a_phrase() {
        let padded = pad_to_min_words("x".to_string(), 10_000);
        for phrase in PADDING_PHRASES {
            assert_eq!(padded.matches(&format!(", {phrase}")).count(), 1);
        }
        assert_eq!(word_count(&padded), 1 + padding_capacity());
    }
}
