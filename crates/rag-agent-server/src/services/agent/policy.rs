//! Tool selection for the reasoning loop.

use super::session::ToolInvocation;
use super::tools::ToolKind;

/// Coarse intent of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Direct lookup of a fact or passage
    Lookup,
    /// Needs reasoning over the passages (why / how / compare ...)
    Interpretation,
    /// Wants an overview of the whole knowledge base
    Overview,
}

const OVERVIEW_MARKERS: &[&str] = &[
    "summary",
    "summarize",
    "summarise",
    "overview",
    "main points",
    "key points",
    "gist",
    "tl;dr",
    "what is this document about",
    "总结",
    "摘要",
    "概述",
    "概要",
];

const INTERPRETATION_MARKERS: &[&str] = &[
    "why",
    "how ",
    "analy",
    "explain",
    "compare",
    "comparison",
    "difference",
    "interpret",
    "evaluate",
    "implication",
    "impact",
    "reason",
    "分析",
    "为什么",
    "解释",
    "比较",
    "评价",
];

pub fn classify_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();
    if OVERVIEW_MARKERS.iter().any(|m| lower.contains(m)) {
        QueryIntent::Overview
    } else if INTERPRETATION_MARKERS.iter().any(|m| lower.contains(m)) {
        QueryIntent::Interpretation
    } else {
        QueryIntent::Lookup
    }
}

/// Chooses the next tool, or `None` to finalize.
pub trait ToolSelectionPolicy: Send + Sync {
    fn select(&self, query: &str, history: &[ToolInvocation]) -> Option<ToolKind>;
}

/// Knowledge search first, escalate to deep analysis for interpretive
/// queries, summary only for overview requests.
///
/// Each call picks the plan step that has not succeeded yet with the fewest
/// attempts so far (plan order breaks ties). Failed steps are retried until
/// the session's iteration cap stops the loop.
#[derive(Debug, Default, Clone)]
pub struct DefaultSelectionPolicy;

impl DefaultSelectionPolicy {
    pub fn plan(intent: QueryIntent) -> &'static [ToolKind] {
        match intent {
            QueryIntent::Lookup => &[ToolKind::KnowledgeSearch],
            QueryIntent::Interpretation => &[ToolKind::KnowledgeSearch, ToolKind::DeepAnalysis],
            QueryIntent::Overview => &[ToolKind::Summary],
        }
    }
}

impl ToolSelectionPolicy for DefaultSelectionPolicy {
    fn select(&self, query: &str, history: &[ToolInvocation]) -> Option<ToolKind> {
        Self::plan(classify_intent(query))
            .iter()
            .copied()
            .filter(|kind| !history.iter().any(|inv| inv.kind == *kind && inv.succeeded()))
            .min_by_key(|kind| history.iter().filter(|inv| inv.kind == *kind).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(kind: ToolKind, ok: bool) -> ToolInvocation {
        let outcome = if ok {
            Ok("found".to_string())
        } else {
            Err("boom".to_string())
        };
        ToolInvocation::new(kind, "q", outcome, 1)
    }

    #[test]
    fn test_classify_intent() {
        assert_eq!(classify_intent("Give me an overview of the report"), QueryIntent::Overview);
        assert_eq!(classify_intent("请总结这份文档"), QueryIntent::Overview);
        assert_eq!(classify_intent("Why did revenue drop in Q3?"), QueryIntent::Interpretation);
        assert_eq!(classify_intent("What is the refund window?"), QueryIntent::Lookup);
    }

    #[test]
    fn test_lookup_finalizes_after_search_succeeds() {
        let policy = DefaultSelectionPolicy;
        let q = "What is the refund window?";
        assert_eq!(policy.select(q, &[]), Some(ToolKind::KnowledgeSearch));
        assert_eq!(policy.select(q, &[invocation(ToolKind::KnowledgeSearch, true)]), None);
    }

    #[test]
    fn test_interpretation_escalates_to_deep_analysis() {
        let policy = DefaultSelectionPolicy;
        let q = "Explain the pricing change";
        let history = vec![invocation(ToolKind::KnowledgeSearch, true)];
        assert_eq!(policy.select(q, &history), Some(ToolKind::DeepAnalysis));

        let history = vec![
            invocation(ToolKind::KnowledgeSearch, true),
            invocation(ToolKind::DeepAnalysis, true),
        ];
        assert_eq!(policy.select(q, &history), None);
    }

    #[test]
    fn test_failed_step_is_retried_after_alternatives() {
        let policy = DefaultSelectionPolicy;
        let q = "Compare plan A and plan B";
        let history = vec![invocation(ToolKind::KnowledgeSearch, false)];
        assert_eq!(policy.select(q, &history), Some(ToolKind::DeepAnalysis));

        let history = vec![
            invocation(ToolKind::KnowledgeSearch, false),
            invocation(ToolKind::DeepAnalysis, false),
        ];
        assert_eq!(policy.select(q, &history), Some(ToolKind::KnowledgeSearch));
    }

    #[test]
    fn test_overview_only_uses_summary() {
        let policy = DefaultSelectionPolicy;
        let q = "summarize the knowledge base";
        assert_eq!(policy.select(q, &[]), Some(ToolKind::Summary));
        assert_eq!(
            policy.select(q, &[invocation(ToolKind::Summary, false)]),
            Some(ToolKind::Summary)
        );
    }
}
