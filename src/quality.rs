//! Quality assessment for candidate items.
//!
//! [`score_with_tier`] is a pure, deterministic function of its input and
//! the static weighting tables below: identical input always yields the
//! identical score, and the result is always within `[0, 100]`.
//!
//! The score feeds the accept/reject gate via the source's configured
//! `minQualityScore`; [`is_high_quality`] (>= 70) is only an auxiliary
//! classification.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Domain-relevant title keywords: 3 points per distinct match, capped at +10.
static TITLE_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "market", "economy", "industry", "launch", "report", "announce",
        "growth", "trade", "policy", "investment", "technology", "research",
        "study", "analysis", "breakthrough", "regulation",
    ]
});

/// Business/domain body keywords: 2 points per distinct match, capped at +10.
static BODY_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "company", "revenue", "customer", "product", "service", "development",
        "government", "official", "according", "percent", "quarter",
        "million", "billion", "agreement", "partnership", "strategy",
    ]
});

/// Technical/domain terminology: 2 points per distinct match, capped at 5 matches.
static TECH_TERMS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "platform", "software", "algorithm", "infrastructure", "logistics",
        "supply chain", "e-commerce", "artificial intelligence", "data",
        "manufacturing", "automation", "sustainability",
    ]
});

/// Spam indicators: presence in the title costs −25 once; each distinct
/// indicator found in the body costs −8.
static SPAM_INDICATORS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "click here", "buy now", "limited offer", "act now", "free money",
        "you won", "subscribe now", "don't miss", "100% free",
    ]
});

const BASE_SCORE: i32 = 40;

/// Score a candidate's suitability in `[0, 100]`, applying the
/// source-quality weighting when the source declares a minimum-quality
/// tier (`>=85`/`>=75`/`>=65` add `+10`/`+7`/`+5`).
pub fn score_with_tier(title: &str, body: &str, min_quality_tier: Option<u8>) -> u8 {
    let mut score = BASE_SCORE;
    score += title_score(title);
    score += body_score(body);

    score += match min_quality_tier {
        Some(tier) if tier >= 85 => 10,
        Some(tier) if tier >= 75 => 7,
        Some(tier) if tier >= 65 => 5,
        _ => 0,
    };

    score += keyword_bonus(&format!("{} {}", title, body), &TECH_TERMS, 2, 5);

    score.clamp(0, 100) as u8
}

/// Auxiliary classification only; the accept gate uses the source's
/// configured threshold.
pub fn is_high_quality(score: u8) -> bool {
    score >= 70
}

fn title_score(title: &str) -> i32 {
    let mut score = 0;
    let len = title.chars().count();

    if (15..=120).contains(&len) {
        score += 15;
        if (25..=80).contains(&len) {
            score += 5;
        }
    }

    score += keyword_bonus(title, &TITLE_KEYWORDS, 3, 4).min(10);

    if spam_indicator_count(title) > 0 {
        score -= 25;
    }

    score
}

fn body_score(body: &str) -> i32 {
    let mut score = 0;
    let len = body.chars().count();

    for threshold in [300, 600, 1200] {
        if len >= threshold {
            score += 10;
        }
    }
    if len < 150 {
        score -= 20;
    }

    let paragraphs = body
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();
    if paragraphs >= 3 {
        score += 5;
    }
    if paragraphs >= 5 {
        score += 5;
    }

    score += keyword_bonus(body, &BODY_KEYWORDS, 2, 5);

    let ratio = sentence_uniqueness(body);
    score += (ratio * 10.0).round() as i32;
    if ratio < 0.7 {
        score -= 15;
    }

    score -= 8 * spam_indicator_count(body) as i32;

    score
}

/// Distinct keyword matches, `points` each, capped at `max_matches` matches.
fn keyword_bonus(text: &str, keywords: &[&str], points: i32, max_matches: usize) -> i32 {
    let lower = text.to_lowercase();
    let matches = keywords
        .iter()
        .filter(|kw| lower.contains(*kw))
        .take(max_matches)
        .count();
    matches as i32 * points
}

fn spam_indicator_count(text: &str) -> usize {
    let lower = text.to_lowercase();
    let mut count = SPAM_INDICATORS
        .iter()
        .filter(|ind| lower.contains(*ind))
        .count();
    // Excessive exclamation counts as one more indicator.
    if text.matches('!').count() >= 3 {
        count += 1;
    }
    count
}

/// Ratio of distinct normalized sentences to total sentences. An empty or
/// single-sentence body counts as fully unique.
fn sentence_uniqueness(body: &str) -> f64 {
    let sentences: Vec<String> = body
        .split(['.', '!', '?'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 1.0;
    }
    let total = sentences.len();
    let distinct: HashSet<&String> = sentences.iter().collect();
    distinct.len() as f64 / total as f64
}
