//! The self-review workflow.
//!
//! ```text
//! copy_editor ─┬─> summarizer
//!              ├─> wordcloud
//!              └─> achievements_extractor ─(tools)─> achievements_tool_node ─┐
//!                                         └(final)──> after_achievements_parser <┘
//!                                                       │ (continue)
//!                                                       v
//!                  review_text_evaluator ─(tools)─> review_tool_node ─> after_evaluation_parser
//! ```

use std::sync::Arc;

use metamorphosis_core::config::EngineConfig;
use metamorphosis_core::error::Result;
use metamorphosis_core::state::TextField;
use metamorphosis_core::traits::ModelInvoker;
use metamorphosis_tools::builtin::{
    copy_edit, evaluate_review, extract_achievements, summarize, word_cloud,
};
use metamorphosis_tools::ToolRegistry;

use crate::graph::{Edge, Graph, RouteTarget};
use crate::nodes::{AgentNode, ParseNode, ParseTarget, ToolExecutionNode, TransformNode};
use crate::router::{self, AgentTurnRouter, ContinueReviewRouter};

pub const COPY_EDITOR: &str = "copy_editor";
pub const SUMMARIZER: &str = "summarizer";
pub const WORDCLOUD: &str = "wordcloud";
pub const ACHIEVEMENTS_EXTRACTOR: &str = "achievements_extractor";
pub const ACHIEVEMENTS_TOOL_NODE: &str = "achievements_tool_node";
pub const AFTER_ACHIEVEMENTS_PARSER: &str = "after_achievements_parser";
pub const REVIEW_TEXT_EVALUATOR: &str = "review_text_evaluator";
pub const REVIEW_TOOL_NODE: &str = "review_tool_node";
pub const AFTER_EVALUATION_PARSER: &str = "after_evaluation_parser";

const EXTRACTOR_SYSTEM: &str = "You help engineers turn self-review notes into a record \
of concrete achievements. Use the extract_achievements tool on the review text.";
const EXTRACTOR_INSTRUCTION: &str = "Extract the achievements from this self-review. \
Call extract_achievements with the full text.";

const EVALUATOR_SYSTEM: &str = "You grade self-review writing for impact, specificity, \
clarity, concision, ownership and collaboration. Use the evaluate_review_text tool.";
const EVALUATOR_INSTRUCTION: &str = "Score this self-review. \
Call evaluate_review_text with the full text.";

/// Build the self-review graph over `registry` and `model`.
///
/// Fails if a tool the graph refers to is neither registered nor declared
/// late-bound.
pub fn self_review_graph(
    registry: Arc<ToolRegistry>,
    model: Arc<dyn ModelInvoker>,
    config: &EngineConfig,
) -> Result<Graph> {
    let copy_editor = TransformNode::new(
        COPY_EDITOR,
        copy_edit::NAME,
        TextField::OriginalText,
        TextField::RewrittenText,
        registry.clone(),
    )
    .with_result_key("copy_edited_text");

    let summarizer = TransformNode::new(
        SUMMARIZER,
        summarize::NAME,
        TextField::RewrittenText,
        TextField::SummaryText,
        registry.clone(),
    )
    .with_result_key("summarized_text");

    let wordcloud = TransformNode::new(
        WORDCLOUD,
        word_cloud::NAME,
        TextField::RewrittenText,
        TextField::VisualizationRef,
        registry.clone(),
    );

    let extractor = AgentNode::new(
        ACHIEVEMENTS_EXTRACTOR,
        model.clone(),
        registry.clone(),
        TextField::RewrittenText,
    )
    .with_tools([extract_achievements::NAME])
    .with_system(EXTRACTOR_SYSTEM)
    .with_instruction(EXTRACTOR_INSTRUCTION);

    let evaluator = AgentNode::new(
        REVIEW_TEXT_EVALUATOR,
        model,
        registry.clone(),
        TextField::RewrittenText,
    )
    .with_tools([evaluate_review::NAME])
    .with_system(EVALUATOR_SYSTEM)
    .with_instruction(EVALUATOR_INSTRUCTION);

    Graph::builder(COPY_EDITOR)
        .node(copy_editor)
        .node(summarizer)
        .node(wordcloud)
        .node(extractor)
        .node(
            ToolExecutionNode::new(ACHIEVEMENTS_TOOL_NODE, ACHIEVEMENTS_EXTRACTOR, registry.clone())
                .with_tools([extract_achievements::NAME]),
        )
        .node(ParseNode::new(
            AFTER_ACHIEVEMENTS_PARSER,
            ACHIEVEMENTS_EXTRACTOR,
            extract_achievements::NAME,
            ParseTarget::Achievements,
        ))
        .node(evaluator)
        .node(
            ToolExecutionNode::new(REVIEW_TOOL_NODE, REVIEW_TEXT_EVALUATOR, registry.clone())
                .with_tools([evaluate_review::NAME]),
        )
        .node(ParseNode::new(
            AFTER_EVALUATION_PARSER,
            REVIEW_TEXT_EVALUATOR,
            evaluate_review::NAME,
            ParseTarget::Scorecard,
        ))
        .edge(
            COPY_EDITOR,
            Edge::fan_out([SUMMARIZER, WORDCLOUD, ACHIEVEMENTS_EXTRACTOR]),
        )
        .edge(
            ACHIEVEMENTS_EXTRACTOR,
            agent_edge(
                ACHIEVEMENTS_EXTRACTOR,
                ACHIEVEMENTS_TOOL_NODE,
                AFTER_ACHIEVEMENTS_PARSER,
            ),
        )
        .edge(ACHIEVEMENTS_TOOL_NODE, Edge::to(AFTER_ACHIEVEMENTS_PARSER))
        .edge(
            AFTER_ACHIEVEMENTS_PARSER,
            Edge::conditional(
                ContinueReviewRouter::new(config.min_achievements),
                [
                    (router::CONTINUE, RouteTarget::node(REVIEW_TEXT_EVALUATOR)),
                    (router::STOP, RouteTarget::End),
                ],
            ),
        )
        .edge(
            REVIEW_TEXT_EVALUATOR,
            agent_edge(REVIEW_TEXT_EVALUATOR, REVIEW_TOOL_NODE, AFTER_EVALUATION_PARSER),
        )
        .edge(REVIEW_TOOL_NODE, Edge::to(AFTER_EVALUATION_PARSER))
        .build(&registry)
}

/// Agent -> tool node while calls are pending, -> parser on a final answer.
fn agent_edge(agent: &str, tool_node: &str, parser: &str) -> Edge {
    Edge::conditional(
        AgentTurnRouter::new(agent),
        [
            (router::TOOLS, RouteTarget::node(tool_node)),
            (router::FINAL, RouteTarget::node(parser)),
            (router::MALFORMED, RouteTarget::Fail),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamorphosis_core::error::MetamorphosisError;
    use metamorphosis_test_utils::{FnTool, ToolCallingModel};

    fn registry(skip: Option<&str>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in [
            copy_edit::NAME,
            summarize::NAME,
            word_cloud::NAME,
            extract_achievements::NAME,
            evaluate_review::NAME,
        ] {
            if Some(name) != skip {
                registry.register(FnTool::fixed(name, serde_json::json!({})));
            }
        }
        registry
    }

    #[test]
    fn test_topology() {
        let graph = self_review_graph(
            Arc::new(registry(None)),
            Arc::new(ToolCallingModel),
            &EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(graph.entry(), COPY_EDITOR);
        assert_eq!(
            graph.terminals(),
            vec![SUMMARIZER, WORDCLOUD, AFTER_EVALUATION_PARSER]
        );
        assert_eq!(
            graph.edge(COPY_EDITOR).unwrap().targets(),
            vec![SUMMARIZER, WORDCLOUD, ACHIEVEMENTS_EXTRACTOR]
        );

        let mermaid = graph.to_mermaid();
        assert!(mermaid.contains("__start__ --> copy_editor;"));
        assert!(mermaid.contains("achievements_extractor -. tools .-> achievements_tool_node;"));
        assert!(mermaid.contains("achievements_extractor -. malformed .-> __fail__;"));
        assert!(mermaid.contains("after_achievements_parser -. stop .-> __end__;"));
        assert!(mermaid.contains("review_tool_node --> after_evaluation_parser;"));
    }

    #[test]
    fn test_missing_tool_fails_build() {
        let err = self_review_graph(
            Arc::new(registry(Some(summarize::NAME))),
            Arc::new(ToolCallingModel),
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MetamorphosisError::ToolNotFound(ref t) if t == "abstractive_summarize"));

        let mut late = registry(Some(word_cloud::NAME));
        late.declare_late_bound(word_cloud::NAME);
        assert!(self_review_graph(
            Arc::new(late),
            Arc::new(ToolCallingModel),
            &EngineConfig::default()
        )
        .is_ok());
    }
}
