// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-ebc
//!
//! Explanation-based chunking: when a rule firing in a substate creates
//! results for a superstate, the chunker explains why by tracing the causal
//! graph back to superstate structure, then compiles that explanation into
//! a new rule the host can match directly next time.
//!
//! ## Architecture
//!
//! - **Symbols** (`symbol`, `registry`): interned, reference-counted symbols
//!   shared between the host and the chunker
//! - **Causal graph** (`causal`): goals, working memory, rule firings and
//!   the preferences they created
//! - **Rule network** (`rete`): the seam to the host's matcher, with an
//!   in-memory reference network and the condition reorderer
//! - **Chunker** (`chunker`): results, dependency analysis, variablization,
//!   validation and installation
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use akh_ebc::causal::{CausalGraph, InstantiationSpec, PreferenceSpec};
//! use akh_ebc::chunker::Chunker;
//! use akh_ebc::config::ChunkerConfig;
//! use akh_ebc::registry::SymbolTable;
//! use akh_ebc::rete::MemoryRuleNetwork;
//!
//! let symbols = Arc::new(SymbolTable::new());
//! let mut graph = CausalGraph::new(Arc::clone(&symbols));
//! let mut network = MemoryRuleNetwork::new(Arc::clone(&symbols));
//! let mut chunker = Chunker::new(ChunkerConfig::default(), Arc::clone(&symbols)).unwrap();
//!
//! let top = graph.add_goal().unwrap();
//! let sub = graph.add_goal().unwrap();
//! let color = symbols.str_constant("color").unwrap();
//! let red = symbols.str_constant("red").unwrap();
//! let seen = graph.add_wme(top, color, red, None).unwrap();
//!
//! let firing = graph
//!     .add_instantiation(
//!         InstantiationSpec::new("notice-red", sub).condition(graph.condition_for_wme(seen).unwrap()),
//!     )
//!     .unwrap();
//! graph.add_preference(firing, PreferenceSpec::acceptable(top, color, red)).unwrap();
//!
//! let report = chunker.attempt_chunk(&mut graph, &mut network, firing).unwrap();
//! println!("{:?}", report.outcome);
//! ```

pub mod causal;
pub mod chunker;
pub mod config;
pub mod error;
pub mod registry;
pub mod rete;
pub mod symbol;
