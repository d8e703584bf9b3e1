//! Workflow state and partial-update merge rules.
//!
//! Every field except `conversation_log` is write-once: a second write is a
//! [`MetamorphosisError::Conflict`] and the state is left untouched. The log
//! is append-only. Because merge never overwrites, updates that touch
//! disjoint fields commute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MetamorphosisError, Result};
use crate::types::{AchievementsList, ConversationTurn, Scorecard};

/// Writer name recorded for the seeded `original_text`.
pub const START: &str = "__start__";

/// Names of the state fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    OriginalText,
    RewrittenText,
    SummaryText,
    VisualizationRef,
    Achievements,
    Scorecard,
    ConversationLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    WriteOnce,
    Append,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OriginalText => "original_text",
            Self::RewrittenText => "rewritten_text",
            Self::SummaryText => "summary_text",
            Self::VisualizationRef => "visualization_ref",
            Self::Achievements => "achievements",
            Self::Scorecard => "scorecard",
            Self::ConversationLog => "conversation_log",
        }
    }

    pub fn merge_mode(&self) -> MergeMode {
        match self {
            Self::ConversationLog => MergeMode::Append,
            _ => MergeMode::WriteOnce,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The string-valued fields, which transform stages read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    OriginalText,
    RewrittenText,
    SummaryText,
    VisualizationRef,
}

impl TextField {
    pub fn field(self) -> Field {
        match self {
            Self::OriginalText => Field::OriginalText,
            Self::RewrittenText => Field::RewrittenText,
            Self::SummaryText => Field::SummaryText,
            Self::VisualizationRef => Field::VisualizationRef,
        }
    }
}

/// The record threaded through every node of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    original_text: Option<String>,
    rewritten_text: Option<String>,
    summary_text: Option<String>,
    visualization_ref: Option<String>,
    achievements: Option<AchievementsList>,
    scorecard: Option<Scorecard>,
    #[serde(default)]
    conversation_log: Vec<ConversationTurn>,
    #[serde(default)]
    completion_flag: bool,
    /// Which node wrote each write-once field.
    #[serde(default)]
    writers: BTreeMap<Field, String>,
}

impl WorkflowState {
    /// Seed a fresh state with the review text.
    pub fn seed(original_text: impl Into<String>) -> Self {
        let mut state = Self::default();
        state.original_text = Some(original_text.into());
        state.writers.insert(Field::OriginalText, START.to_string());
        state
    }

    pub fn original_text(&self) -> Option<&str> {
        self.original_text.as_deref()
    }

    pub fn rewritten_text(&self) -> Option<&str> {
        self.rewritten_text.as_deref()
    }

    pub fn summary_text(&self) -> Option<&str> {
        self.summary_text.as_deref()
    }

    pub fn visualization_ref(&self) -> Option<&str> {
        self.visualization_ref.as_deref()
    }

    pub fn achievements(&self) -> Option<&AchievementsList> {
        self.achievements.as_ref()
    }

    pub fn scorecard(&self) -> Option<&Scorecard> {
        self.scorecard.as_ref()
    }

    pub fn conversation_log(&self) -> &[ConversationTurn] {
        &self.conversation_log
    }

    /// True once both `achievements` and `scorecard` are set.
    pub fn completion_flag(&self) -> bool {
        self.completion_flag
    }

    /// The node that wrote `field`, if it has been written.
    pub fn writer(&self, field: Field) -> Option<&str> {
        self.writers.get(&field).map(|s| s.as_str())
    }

    pub fn text(&self, field: TextField) -> Option<&str> {
        match field {
            TextField::OriginalText => self.original_text(),
            TextField::RewrittenText => self.rewritten_text(),
            TextField::SummaryText => self.summary_text(),
            TextField::VisualizationRef => self.visualization_ref(),
        }
    }

    pub fn is_set(&self, field: Field) -> bool {
        match field {
            Field::OriginalText => self.original_text.is_some(),
            Field::RewrittenText => self.rewritten_text.is_some(),
            Field::SummaryText => self.summary_text.is_some(),
            Field::VisualizationRef => self.visualization_ref.is_some(),
            Field::Achievements => self.achievements.is_some(),
            Field::Scorecard => self.scorecard.is_some(),
            Field::ConversationLog => !self.conversation_log.is_empty(),
        }
    }

    /// Apply a partial update written by `writer`, returning the new state.
    ///
    /// Fails without side effects if the update targets an already-set
    /// write-once field.
    pub fn merge(&self, update: &StateUpdate, writer: &str) -> Result<WorkflowState> {
        for field in update.fields() {
            if field.merge_mode() == MergeMode::WriteOnce && self.is_set(field) {
                return Err(MetamorphosisError::Conflict {
                    field: field.name().to_string(),
                    first_writer: self.writer(field).unwrap_or(START).to_string(),
                    second_writer: writer.to_string(),
                });
            }
        }

        let mut next = self.clone();
        if let Some(v) = &update.original_text {
            next.original_text = Some(v.clone());
        }
        if let Some(v) = &update.rewritten_text {
            next.rewritten_text = Some(v.clone());
        }
        if let Some(v) = &update.summary_text {
            next.summary_text = Some(v.clone());
        }
        if let Some(v) = &update.visualization_ref {
            next.visualization_ref = Some(v.clone());
        }
        if let Some(v) = &update.achievements {
            next.achievements = Some(v.clone());
        }
        if let Some(v) = &update.scorecard {
            next.scorecard = Some(v.clone());
        }
        next.conversation_log
            .extend(update.conversation_log.iter().cloned());

        for field in update.fields() {
            if field.merge_mode() == MergeMode::WriteOnce {
                next.writers.insert(field, writer.to_string());
            }
        }
        next.completion_flag = next.achievements.is_some() && next.scorecard.is_some();
        Ok(next)
    }
}

/// A partial update returned by a node. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievements: Option<AchievementsList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorecard: Option<Scorecard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_log: Vec<ConversationTurn>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, field: TextField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            TextField::OriginalText => self.original_text = value,
            TextField::RewrittenText => self.rewritten_text = value,
            TextField::SummaryText => self.summary_text = value,
            TextField::VisualizationRef => self.visualization_ref = value,
        }
        self
    }

    pub fn with_achievements(mut self, achievements: AchievementsList) -> Self {
        self.achievements = Some(achievements);
        self
    }

    pub fn with_scorecard(mut self, scorecard: Scorecard) -> Self {
        self.scorecard = Some(scorecard);
        self
    }

    pub fn with_turns(mut self, turns: impl IntoIterator<Item = ConversationTurn>) -> Self {
        self.conversation_log.extend(turns);
        self
    }

    /// Fields this update writes, in declaration order.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.original_text.is_some() {
            fields.push(Field::OriginalText);
        }
        if self.rewritten_text.is_some() {
            fields.push(Field::RewrittenText);
        }
        if self.summary_text.is_some() {
            fields.push(Field::SummaryText);
        }
        if self.visualization_ref.is_some() {
            fields.push(Field::VisualizationRef);
        }
        if self.achievements.is_some() {
            fields.push(Field::Achievements);
        }
        if self.scorecard.is_some() {
            fields.push(Field::Scorecard);
        }
        if !self.conversation_log.is_empty() {
            fields.push(Field::ConversationLog);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Achievement, ImpactArea, ToolCallRequest};

    fn achievements() -> AchievementsList {
        AchievementsList {
            items: vec![Achievement {
                title: "Shipped X".into(),
                outcome: "Cut latency 50%".into(),
                impact_area: ImpactArea::Performance,
                metric_strings: vec!["50%".into()],
                timeframe: None,
                ownership_scope: None,
                collaborators: vec![],
            }],
            size: 6,
            unit: "tokens".into(),
        }
    }

    #[test]
    fn test_seed_records_start_writer() {
        let state = WorkflowState::seed("Shipped X.");
        assert_eq!(state.original_text(), Some("Shipped X."));
        assert_eq!(state.writer(Field::OriginalText), Some(START));
        assert!(!state.completion_flag());
    }

    #[test]
    fn test_second_write_conflicts_and_keeps_first_value() {
        let state = WorkflowState::seed("text");
        let first = StateUpdate::new().with_text(TextField::SummaryText, "first");
        let state = state.merge(&first, "summarizer").unwrap();

        let second = StateUpdate::new().with_text(TextField::SummaryText, "second");
        let err = state.merge(&second, "rogue").unwrap_err();
        match err {
            MetamorphosisError::Conflict {
                field,
                first_writer,
                second_writer,
            } => {
                assert_eq!(field, "summary_text");
                assert_eq!(first_writer, "summarizer");
                assert_eq!(second_writer, "rogue");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state.summary_text(), Some("first"));
    }

    #[test]
    fn test_original_text_is_never_overwritten() {
        let state = WorkflowState::seed("text");
        let update = StateUpdate::new().with_text(TextField::OriginalText, "other");
        assert!(matches!(
            state.merge(&update, "copy_editor"),
            Err(MetamorphosisError::Conflict { .. })
        ));
    }

    #[test]
    fn test_conversation_log_appends() {
        let state = WorkflowState::seed("text");
        let a = StateUpdate::new().with_turns([ConversationTurn::utterance("agent", "one")]);
        let b = StateUpdate::new().with_turns([ConversationTurn::tool_call(
            "agent",
            ToolCallRequest::new("extract_achievements", serde_json::json!({})),
        )]);
        let state = state.merge(&a, "agent").unwrap();
        let state = state.merge(&b, "agent").unwrap();
        assert_eq!(state.conversation_log().len(), 2);
        assert_eq!(state.writer(Field::ConversationLog), None);
    }

    #[test]
    fn test_disjoint_merges_commute() {
        let base = WorkflowState::seed("text");
        let a = StateUpdate::new().with_text(TextField::SummaryText, "summary");
        let b = StateUpdate::new().with_text(TextField::VisualizationRef, "cloud.svg");

        let ab = base.merge(&a, "summarizer").unwrap().merge(&b, "wordcloud").unwrap();
        let ba = base.merge(&b, "wordcloud").unwrap().merge(&a, "summarizer").unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_completion_flag_needs_both_results() {
        let state = WorkflowState::seed("text")
            .merge(&StateUpdate::new().with_achievements(achievements()), "parser")
            .unwrap();
        assert!(!state.completion_flag());

        let card = Scorecard {
            metrics: vec![],
            overall: 70,
            verdict: crate::types::Verdict::Strong,
            notes: vec![],
            radar_labels: vec![],
            radar_values: vec![],
        };
        let state = state
            .merge(&StateUpdate::new().with_scorecard(card), "evaluator")
            .unwrap();
        assert!(state.completion_flag());
    }

    #[test]
    fn test_update_fields_and_serialization() {
        let update = StateUpdate::new()
            .with_text(TextField::RewrittenText, "clean")
            .with_turns([ConversationTurn::utterance("a", "b")]);
        assert_eq!(
            update.fields(),
            vec![Field::RewrittenText, Field::ConversationLog]
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["rewritten_text"], "clean");
        assert!(json.get("summary_text").is_none());
        assert!(StateUpdate::new().is_empty());
    }

    #[test]
    fn test_state_serde_roundtrip_preserves_writers() {
        let state = WorkflowState::seed("text")
            .merge(
                &StateUpdate::new().with_text(TextField::RewrittenText, "clean"),
                "copy_editor",
            )
            .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.writer(Field::RewrittenText), Some("copy_editor"));
    }
}
