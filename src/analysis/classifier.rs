/// Tunable thresholds for the AI-style content heuristic.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Sentence-structure penalties only apply past this length
    pub long_text_chars: usize,
    /// Mean words per sentence above this adds the uniformity penalty
    pub max_mean_words_per_sentence: f64,
    /// Sentence count for the density penalty
    pub dense_sentence_count: usize,
    /// Mean chars per sentence for the density penalty
    pub dense_mean_chars_per_sentence: f64,
    /// Pronoun scarcity only applies past this length
    pub impersonal_text_chars: usize,
    /// Fewer first-person pronouns than this reads as impersonal
    pub min_pronoun_count: usize,

    pub weight_sentence_length: f64,
    pub weight_density: f64,
    pub weight_transition_pair: f64,
    pub weight_impersonal: f64,

    /// Scores above this are flagged suspicious
    pub suspicion_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            long_text_chars: 500,
            max_mean_words_per_sentence: 25.0,
            dense_sentence_count: 20,
            dense_mean_chars_per_sentence: 100.0,
            impersonal_text_chars: 200,
            min_pronoun_count: 3,
            weight_sentence_length: 0.3,
            weight_density: 0.2,
            weight_transition_pair: 0.15,
            weight_impersonal: 0.2,
            suspicion_threshold: 0.5,
        }
    }
}

/// Outcome of scoring accumulated text for AI-generated stylistic patterns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentAssessment {
    pub score: f64,
    pub is_suspicious: bool,
}

/// Paired discourse markers that co-occur far more often in generated prose
/// than in student writing. Each pair present in the text adds one penalty.
const TRANSITION_PAIRS: [(&str, &str); 5] = [
    ("however", "furthermore"),
    ("moreover", "consequently"),
    ("in addition", "in conclusion"),
    ("firstly", "secondly"),
    ("on the other hand", "in summary"),
];

const FIRST_PERSON_PRONOUNS: [&str; 7] = ["i", "me", "my", "mine", "we", "our", "us"];

/// Score text for AI-generated-style patterns. Pure and total: empty or short
/// input simply scores zero, it never fails.
pub fn assess(text: &str, config: &ClassifierConfig) -> ContentAssessment {
    let char_count = text.chars().count();
    let mut score: f64 = 0.0;

    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if char_count > config.long_text_chars && !sentences.is_empty() {
        let total_words: usize = sentences
            .iter()
            .map(|s| s.split_whitespace().count())
            .sum();
        let mean_words = total_words as f64 / sentences.len() as f64;
        if mean_words > config.max_mean_words_per_sentence {
            score += config.weight_sentence_length;
        }

        let total_chars: usize = sentences.iter().map(|s| s.chars().count()).sum();
        let mean_chars = total_chars as f64 / sentences.len() as f64;
        if sentences.len() > config.dense_sentence_count
            && mean_chars > config.dense_mean_chars_per_sentence
        {
            score += config.weight_density;
        }
    }

    let lowered = text.to_lowercase();
    for (first, second) in TRANSITION_PAIRS {
        if lowered.contains(first) && lowered.contains(second) {
            score += config.weight_transition_pair;
        }
    }

    if char_count > config.impersonal_text_chars
        && count_pronouns(&lowered) < config.min_pronoun_count
    {
        score += config.weight_impersonal;
    }

    let score = score.clamp(0.0, 1.0);
    ContentAssessment {
        score,
        is_suspicious: score > config.suspicion_threshold,
    }
}

fn count_pronouns(lowered: &str) -> usize {
    lowered
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|word| FIRST_PERSON_PRONOUNS.contains(word))
        .count()
}
