//! Shared prompt and strict judgment parser.

use serde::Deserialize;

use crate::types::{
    truncate_chars, EdgeJudgment, EvaluationResult, MarketSnapshot, Side, MAX_REASONING_CHARS,
};

pub const SYSTEM_PROMPT: &str = "\
You are an expert prediction market analyst specializing in edge detection.

Your job is to analyze a binary prediction market and decide whether the current \
odds are mispriced, i.e. whether the true probability differs materially from the \
market price.

RULES:
1. Be conservative. Markets are usually efficient and edges are rare.
2. Only give a confidence of 7 or more when you would actually take the position.
3. Explain your reasoning in 2-3 sentences, including why the recommended side is undervalued.
4. Never invent facts. If you lack information, say so and lower your confidence.

Respond ONLY with a single JSON object in exactly this format:
{\"confidence\": <integer 1-10>, \"recommended_side\": \"Yes\" or \"No\", \"reasoning\": \"<2-3 sentences>\"}";

/// Build the user message for one market.
pub fn build_prompt(market: &MarketSnapshot, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Analyze this prediction market:\n\n\
         Market question: {}\n\n\
         Current odds:\n  - Yes: {:.1}%\n  - No: {:.1}%\n\n\
         Volume: ${:.0} | Liquidity: ${:.0}\n",
        market.question,
        market.yes_price * 100.0,
        market.no_price * 100.0,
        market.volume,
        market.liquidity,
    );

    if let Some(close) = market.close_time {
        prompt.push_str(&format!("Closes: {}\n", close.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(desc) = market.description.as_deref() {
        prompt.push_str(&format!("\nMarket description: {}\n", truncate_chars(desc, 1500)));
    }
    match context {
        Some(ctx) if !ctx.trim().is_empty() => {
            prompt.push_str(&format!("\nExternal context (news/stats): {ctx}\n"));
        }
        _ => prompt.push_str("\nExternal context: none provided. Analyze market structure only.\n"),
    }

    prompt.push_str("\nProvide your edge analysis as JSON:");
    prompt
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // Skip a language tag such as `json` on the opening fence line.
    let body = match after.find('\n') {
        Some(nl) if after[..nl].chars().all(|c| c.is_ascii_alphanumeric()) => &after[nl + 1..],
        _ => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default, alias = "confidence_score")]
    confidence: Option<serde_json::Value>,
    #[serde(default, alias = "recommended_position")]
    recommended_side: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Strict parse-and-validate of a model answer.
pub fn parse_judgment(text: &str) -> EvaluationResult {
    match try_parse(text) {
        Ok(j) => EvaluationResult::Judged(j),
        Err(e) => EvaluationResult::ParseError(e),
    }
}

fn try_parse(text: &str) -> Result<EdgeJudgment, String> {
    let body = strip_code_fences(text);
    // Tolerate prose around the object.
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(s), Some(e)) if s < e => &body[s..=e],
        _ => return Err(format!("no JSON object in response: {}", truncate_chars(body, 80))),
    };

    let raw: RawJudgment =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;

    let confidence = match raw.confidence {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|c| (1..=10).contains(c))
    .ok_or_else(|| "confidence must be an integer in 1..=10".to_string())? as u8;

    let recommended_side = raw
        .recommended_side
        .as_deref()
        .ok_or_else(|| "missing recommended_side".to_string())?
        .parse::<Side>()
        .map_err(|e| e.to_string())?;

    let reasoning = raw
        .reasoning
        .map(|r| truncate_chars(r.trim(), MAX_REASONING_CHARS))
        .ok_or_else(|| "missing reasoning".to_string())?;

    Ok(EdgeJudgment {
        confidence,
        recommended_side,
        reasoning,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
