//! slimdex - whole-program DEX shrinking, renaming and repackaging
//!
//! This crate implements the analysis and transformation core of an Android
//! application compiler: it takes a program graph of classes (produced by
//! external classfile/dex codecs), applies a Proguard-style keep-rule
//! configuration and emits a partitioned set of dex payloads together with
//! the rename map and main dex list.
//!
//! # Architecture
//!
//! The pipeline consists of:
//! 1. **Program graph** - interned types/strings/protos/methods/fields, the
//!    class table and the subtype index
//! 2. **Keep rules** - Proguard configuration parsing and matching
//! 3. **Root set** - classification of every item against the rules
//! 4. **Enqueuer** - the work-list liveness fixpoint
//! 5. **Pruning** - dead classes and members are dropped in place
//! 6. **Minification** - class and method renaming under dispatch and
//!    library constraints
//! 7. **Call graph** - cycle-broken bottom-up scheduling of method passes
//! 8. **Distribution & writing** - packing into dex files under the 64 Ki
//!    reference limits and parallel emission through a codec

pub mod compiler;
pub mod config;
pub mod dex;
pub mod error;
pub mod graph;
pub mod ir;
pub mod naming;
pub mod report;
pub mod shaking;

pub use compiler::Compiler;
pub use config::{CompilationMode, CompilerOptions};
pub use dex::{ApplicationWriter, DexCodec, DirectorySink, OutputSink, VirtualFile};
pub use error::{CompileError, Result};
pub use graph::{Application, ApplicationBuilder, ClassBuilder, ItemFactory, NamingLens};
pub use ir::CallGraph;
pub use naming::{Minifier, ProguardMap};
pub use report::ShrinkReport;
pub use shaking::{
    Configuration, ConfigurationParser, DiscardedChecker, Enqueuer, Liveness, RootSet,
    RootSetBuilder, TreePruner,
};
