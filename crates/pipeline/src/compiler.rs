//! Branch-pipeline expression compiler.
//!
//! An expression is a list of stages separated by `,` or whitespace. A
//! standalone `&` between stages is accepted as a separator; inside a stage it
//! is an ordinary character.
//! A stage is a `:`/`;`-separated token list:
//!
//! ```text
//! kind:correlation_id:related_id:side[:arg...]
//! ```
//!
//! `kind` and `side` (`l` / `r`) are case-insensitive. The optional trailing
//! arguments depend on the kind; each kind's [`StageGrammar`] fills missing
//! trailing arguments with defaults and renders the parameter blob the branch
//! service parses:
//!
//! | Kind | Arguments | Blob |
//! |------|-----------|------|
//! | `filter` | pattern | `rule:<pattern>;output_filename:f<id>` or `rule:.*;output_filename:log<id>` |
//! | `sum` `count` `avg` `max` `min` | pattern, scope | `rule:<pattern>;lor:<scope>` |
//! | `knn` | pattern, scope, metric, center, distance | `rule:..;lor:..;knn:<metric>:<center>:<distance>` |
//! | `groupby` | pattern, scope, aggregation | `rule:..;lor:..;groupby:<aggregation>` |
//! | `indexer` | backend, database, prefix | `type:<backend>;schema:<database>:<prefix>` |
//! | `rank` `codec` | — | empty |
//!
//! Malformed stages are dropped with a [`Diagnostic`]; compilation continues
//! with the next stage. Once [`MAX_STAGES`] stages are compiled the rest of the
//! expression is ignored.

use tracing::{debug, warn};

use crate::container::{PipelineContainer, MAX_STAGES};
use crate::errors::CompileError;
use crate::operators::{OperatorDescriptor, OperatorKind, Side};
use crate::types::{Diagnostic, DiagnosticKind};

/// Tokens every stage must carry: kind, correlation id, related id, side.
const MANDATORY_TOKENS: usize = 4;

const ANY_PATTERN: &str = ".*";
const ALL_SCOPE: &str = "all";

/// Output of a successful [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    /// The compiled stages.
    pub container: PipelineContainer,
    /// Findings for stages that were dropped or altered.
    pub diagnostics: Vec<Diagnostic>,
}

/// Compiles a pipeline expression.
///
/// Returns the valid stages plus diagnostics for everything that was skipped.
/// Empty input yields an empty container; a non-empty expression in which no
/// stage is valid yields [`CompileError::NoValidStages`].
pub fn compile(expression: &str) -> Result<Compilation, CompileError> {
    let mut container = PipelineContainer::new();
    let mut diagnostics = Vec::new();

    let stages: Vec<&str> = split_stages(expression).collect();
    for (index, text) in stages.iter().enumerate() {
        if container.is_full() {
            let diagnostic = Diagnostic::new(
                index,
                *text,
                DiagnosticKind::CapacityExceeded,
                format!(
                    "at most {MAX_STAGES} stages, ignoring {} remaining",
                    stages.len() - index
                ),
            );
            record(&mut diagnostics, diagnostic);
            break;
        }

        if let Some(descriptor) = compile_stage(index, text, &mut diagnostics) {
            debug!(
                stage = index,
                kind = %descriptor.kind(),
                params = descriptor.parameters_str().unwrap_or_default(),
                "compiled stage"
            );
            container.append(descriptor);
        }
    }

    if container.is_empty() && !stages.is_empty() {
        return Err(CompileError::NoValidStages { diagnostics });
    }

    debug!(
        stages = container.len(),
        diagnostics = diagnostics.len(),
        "compiled pipeline expression"
    );
    Ok(Compilation {
        container,
        diagnostics,
    })
}

fn split_stages(expression: &str) -> impl Iterator<Item = &str> {
    expression
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty() && *s != "&")
}

fn split_tokens(stage: &str) -> Vec<&str> {
    stage
        .split([':', ';'])
        .filter(|s| !s.is_empty())
        .collect()
}

fn record(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    warn!(
        stage = diagnostic.stage,
        kind = ?diagnostic.kind,
        text = %diagnostic.text,
        "{}",
        diagnostic.message
    );
    diagnostics.push(diagnostic);
}

fn compile_stage(
    index: usize,
    text: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<OperatorDescriptor> {
    let tokens = split_tokens(text);
    let reject = |diagnostics: &mut Vec<Diagnostic>, kind, message: String| {
        record(diagnostics, Diagnostic::new(index, text, kind, message));
        None
    };

    if tokens.len() < MANDATORY_TOKENS {
        return reject(
            diagnostics,
            DiagnosticKind::InsufficientArguments,
            format!(
                "expected kind:id:rid:side, got {} token(s)",
                tokens.len()
            ),
        );
    }

    let kind = match tokens[0].parse::<OperatorKind>() {
        Ok(kind) => kind,
        Err(name) => {
            return reject(
                diagnostics,
                DiagnosticKind::UnknownKind,
                format!("unknown operator '{name}'"),
            )
        }
    };

    let Ok(correlation_id) = tokens[1].parse::<u32>() else {
        return reject(
            diagnostics,
            DiagnosticKind::InvalidIdentifier,
            format!("invalid correlation id '{}'", tokens[1]),
        );
    };
    let Ok(related_id) = tokens[2].parse::<u32>() else {
        return reject(
            diagnostics,
            DiagnosticKind::InvalidIdentifier,
            format!("invalid related id '{}'", tokens[2]),
        );
    };
    let Some(side) = Side::from_token(tokens[3]) else {
        return reject(
            diagnostics,
            DiagnosticKind::InvalidSide,
            format!("invalid side '{}', expected 'l' or 'r'", tokens[3]),
        );
    };

    let grammar = grammar_for(kind);
    let mut args = &tokens[MANDATORY_TOKENS..];
    if args.len() > grammar.max_args() {
        record(
            diagnostics,
            Diagnostic::new(
                index,
                text,
                DiagnosticKind::ExtraArguments,
                format!(
                    "{kind} takes at most {} argument(s), got {}; using defaults",
                    grammar.max_args(),
                    args.len()
                ),
            ),
        );
        args = &args[..0];
    }

    let parameters = grammar.encode(correlation_id, args);
    Some(OperatorDescriptor::new(
        kind,
        correlation_id,
        related_id,
        side,
        parameters.into_bytes(),
    ))
}

// ---------------------------------------------------------------------------
// Grammars
// ---------------------------------------------------------------------------

/// Argument grammar and parameter encoding for one operator kind.
pub trait StageGrammar: Sync {
    /// Number of optional arguments in the longest recognised form.
    fn max_args(&self) -> usize;

    /// Renders the parameter blob.
    ///
    /// `args` holds at most [`max_args`](Self::max_args) tokens; missing
    /// trailing arguments take the kind's defaults.
    fn encode(&self, correlation_id: u32, args: &[&str]) -> String;
}

/// Returns the grammar for `kind`.
pub fn grammar_for(kind: OperatorKind) -> &'static dyn StageGrammar {
    match kind {
        OperatorKind::Filter => &FilterGrammar,
        OperatorKind::Sum
        | OperatorKind::Count
        | OperatorKind::Avg
        | OperatorKind::Max
        | OperatorKind::Min => &AggregateGrammar,
        OperatorKind::Knn => &KnnGrammar,
        OperatorKind::GroupBy => &GroupByGrammar,
        OperatorKind::Indexer => &IndexerGrammar,
        OperatorKind::Rank | OperatorKind::Codec => &BareGrammar,
    }
}

fn arg<'a>(args: &[&'a str], position: usize, default: &'a str) -> &'a str {
    args.get(position).copied().unwrap_or(default)
}

/// `rule:<pattern>;lor:<scope>`, shared by every rule-carrying grammar.
fn rule_clause(args: &[&str]) -> String {
    format!(
        "rule:{};lor:{}",
        arg(args, 0, ANY_PATTERN),
        arg(args, 1, ALL_SCOPE)
    )
}

struct FilterGrammar;

impl StageGrammar for FilterGrammar {
    fn max_args(&self) -> usize {
        1
    }

    fn encode(&self, correlation_id: u32, args: &[&str]) -> String {
        match args.first() {
            Some(pattern) => format!("rule:{pattern};output_filename:f{correlation_id}"),
            None => format!("rule:{ANY_PATTERN};output_filename:log{correlation_id}"),
        }
    }
}

struct AggregateGrammar;

impl StageGrammar for AggregateGrammar {
    fn max_args(&self) -> usize {
        2
    }

    fn encode(&self, _correlation_id: u32, args: &[&str]) -> String {
        rule_clause(args)
    }
}

struct KnnGrammar;

impl StageGrammar for KnnGrammar {
    fn max_args(&self) -> usize {
        5
    }

    fn encode(&self, _correlation_id: u32, args: &[&str]) -> String {
        format!(
            "{};knn:{}:{}:{}",
            rule_clause(args),
            arg(args, 2, "linear"),
            arg(args, 3, "0"),
            arg(args, 4, "+-1")
        )
    }
}

struct GroupByGrammar;

impl StageGrammar for GroupByGrammar {
    fn max_args(&self) -> usize {
        3
    }

    fn encode(&self, _correlation_id: u32, args: &[&str]) -> String {
        format!("{};groupby:{}", rule_clause(args), arg(args, 2, "count"))
    }
}

struct IndexerGrammar;

impl StageGrammar for IndexerGrammar {
    fn max_args(&self) -> usize {
        3
    }

    fn encode(&self, _correlation_id: u32, args: &[&str]) -> String {
        format!(
            "type:{};schema:{}:{}",
            arg(args, 0, "plain"),
            arg(args, 1, "default_db"),
            arg(args, 2, "default")
        )
    }
}

/// RANK and CODEC carry no parameters.
struct BareGrammar;

impl StageGrammar for BareGrammar {
    fn max_args(&self) -> usize {
        0
    }

    fn encode(&self, _correlation_id: u32, _args: &[&str]) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(expression: &str) -> Vec<String> {
        compile(expression)
            .unwrap()
            .container
            .iter()
            .map(|s| s.parameters_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn filter_forms() {
        assert_eq!(params("filter:7:0:l"), ["rule:.*;output_filename:log7"]);
        assert_eq!(params("filter:7:0:l:png"), ["rule:png;output_filename:f7"]);
    }

    #[test]
    fn aggregate_cascade() {
        for kind in ["sum", "count", "avg", "max", "min"] {
            assert_eq!(params(&format!("{kind}:1:0:l")), ["rule:.*;lor:all"]);
            assert_eq!(params(&format!("{kind}:1:0:l:x")), ["rule:x;lor:all"]);
            assert_eq!(params(&format!("{kind}:1:0:l:x:match")), ["rule:x;lor:match"]);
        }
    }

    #[test]
    fn knn_cascade() {
        assert_eq!(params("knn:1:0:r"), ["rule:.*;lor:all;knn:linear:0:+-1"]);
        assert_eq!(params("knn:1:0:r:a"), ["rule:a;lor:all;knn:linear:0:+-1"]);
        assert_eq!(params("knn:1:0:r:a:left"), ["rule:a;lor:left;knn:linear:0:+-1"]);
        assert_eq!(params("knn:1:0:r:a:left:log"), ["rule:a;lor:left;knn:log:0:+-1"]);
        assert_eq!(params("knn:1:0:r:a:left:log:5"), ["rule:a;lor:left;knn:log:5:+-1"]);
        assert_eq!(
            params("knn:1:0:r:a:left:log:5:+-3"),
            ["rule:a;lor:left;knn:log:5:+-3"]
        );
    }

    #[test]
    fn groupby_cascade() {
        assert_eq!(params("groupby:1:0:l"), ["rule:.*;lor:all;groupby:count"]);
        assert_eq!(params("groupby:1:0:l:a"), ["rule:a;lor:all;groupby:count"]);
        assert_eq!(params("groupby:1:0:l:a:right"), ["rule:a;lor:right;groupby:count"]);
        assert_eq!(params("groupby:1:0:l:a:right:max"), ["rule:a;lor:right;groupby:max"]);
    }

    #[test]
    fn indexer_cascade() {
        assert_eq!(params("indexer:1:0:l"), ["type:plain;schema:default_db:default"]);
        assert_eq!(params("indexer:1:0:l:bdb"), ["type:bdb;schema:default_db:default"]);
        assert_eq!(params("indexer:1:0:l:bdb:img"), ["type:bdb;schema:img:default"]);
        assert_eq!(params("indexer:1:0:l:bdb:img:png"), ["type:bdb;schema:img:png"]);
    }

    #[test]
    fn rank_and_codec_have_no_parameters() {
        let compiled = compile("rank:1:0:l codec:2:1:R").unwrap();
        let stages = compiled.container.stages();
        assert_eq!(stages[0].kind(), OperatorKind::Rank);
        assert_eq!(stages[1].kind(), OperatorKind::Codec);
        assert!(stages.iter().all(|s| s.parameter_len() == 0));
        assert!(compiled.diagnostics.is_empty());
    }

    #[test]
    fn overlong_argument_lists_fall_back_to_defaults() {
        let compiled = compile("sum:1:0:l:a:left:extra").unwrap();
        assert_eq!(
            compiled.container.stages()[0].parameters_str(),
            Some("rule:.*;lor:all")
        );
        assert_eq!(compiled.diagnostics.len(), 1);
        assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::ExtraArguments);
    }

    #[test]
    fn semicolons_and_empty_tokens_are_separators() {
        assert_eq!(params("sum;1;0;l;a::right"), ["rule:a;lor:right"]);
    }

    #[test]
    fn bad_identifiers_drop_the_stage() {
        let compiled = compile("filter:one:0:l rank:1:0:l").unwrap();
        assert_eq!(compiled.container.len(), 1);
        assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::InvalidIdentifier);

        let err = compile("filter:1:-2:l").unwrap_err();
        let CompileError::NoValidStages { diagnostics } = err;
        assert_eq!(diagnostics[0].kind, DiagnosticKind::InvalidIdentifier);
    }

    #[test]
    fn short_stages_are_rejected() {
        let CompileError::NoValidStages { diagnostics } = compile("filter:1:0").unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::InsufficientArguments);
        assert_eq!(diagnostics[0].text, "filter:1:0");
    }

    #[test]
    fn ampersand_inside_a_stage_is_literal() {
        assert_eq!(params("filter:1:0:l:a&b"), ["rule:a&b;output_filename:f1"]);
        assert_eq!(
            params("sum:1:0:l:x&y & max:2:0:r"),
            ["rule:x&y;lor:all", "rule:.*;lor:all"]
        );

        let compiled = compile("filter:1:0:l:a&b").unwrap();
        assert!(compiled.diagnostics.is_empty());
    }

    #[test]
    fn blank_input_is_not_an_error() {
        for input in ["", "   ", ", ,", "&", " & & "] {
            let compiled = compile(input).unwrap();
            assert!(compiled.container.is_empty());
            assert!(compiled.diagnostics.is_empty());
        }
    }

    #[test]
    fn grammar_table_covers_every_kind() {
        for kind in OperatorKind::ALL {
            let grammar = grammar_for(kind);
            let blob = grammar.encode(3, &[]);
            match kind {
                OperatorKind::Rank | OperatorKind::Codec => assert!(blob.is_empty()),
                _ => assert!(!blob.is_empty()),
            }
        }
    }
}
