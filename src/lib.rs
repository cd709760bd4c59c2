//! openapi-infer: OpenAPI documents inferred from how a Rust web project builds its routers.
//!
//! No annotations are required. The source is lowered into a small typed program, router
//! values are tracked through bindings, chained calls, closures and helper functions, and the
//! resulting route tree is turned into an OpenAPI 3.1 document.
//!
//! # Architecture
//!
//! 1. [`scanner`] - finds the project's `.rs` files
//! 2. [`parser`] - parses them with `syn`
//! 3. [`resolver`] - lowers syntax trees into a [`program::Program`] with types and bindings
//! 4. [`catalog`] - maps configured router types to the roles of their methods
//! 5. [`engine`] - worklist analysis producing a [`route_tree::RouteTree`]
//! 6. [`recognizer`] - infers request/response data from handler signatures and bodies
//! 7. [`metadata`] - explicit `describe(..)` chains, group metadata and the overlay merge
//! 8. [`schema_generator`] - converts program types into schemas and components
//! 9. [`openapi_builder`] - assembles the document
//! 10. [`serializer`] - YAML or JSON output
//!
//! # Example Usage
//!
//! ```no_run
//! use openapi_infer::{
//!     catalog::RouterCatalog,
//!     config::Config,
//!     engine::Analyzer,
//!     openapi_builder::OpenApiBuilder,
//!     parser::SourceParser,
//!     recognizer::{annotate, PatternRecognizer},
//!     resolver::SourceResolver,
//!     scanner::SourceScanner,
//!     serializer::serialize_yaml,
//! };
//! use std::path::PathBuf;
//!
//! # fn main() -> openapi_infer::error::Result<()> {
//! let root = PathBuf::from("./my-project");
//! let config = Config::load(&root)?;
//! let files = SourceScanner::new(root.clone()).scan()?.rust_files;
//! let parsed = SourceParser::new(root).parse_files(&files)?;
//!
//! let program = SourceResolver::resolve(&parsed);
//! let catalog = RouterCatalog::resolve(&config.router_definitions, &program)?;
//! let mut analysis = Analyzer::new(&program, &catalog, &config).analyze();
//! annotate(&mut analysis.tree, &program, &config, &PatternRecognizer::new(&config));
//!
//! let document = OpenApiBuilder::new(&program, &config).build(&mut analysis.tree)?;
//! println!("{}", serialize_yaml(&document)?);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod openapi_builder;
pub mod parser;
pub mod program;
pub mod recognizer;
pub mod resolver;
pub mod route_tree;
pub mod scanner;
pub mod schema_generator;
pub mod serializer;
