pub mod api;
pub mod compiler;
pub mod consts;
pub mod engine;
pub mod model;
pub mod parser;
pub mod types;
pub mod update;
pub mod xdm;

pub use api::{Engine, EngineBuilder, EngineConfig, EvaluateOptions, QueryResult, ReturnType, UpdatingResult};
pub use compiler::closure::{NativeQuery, compile_native};
pub use compiler::{CompiledQuery, compile};
pub use engine::evaluator::{evaluate, evaluate_stream, evaluate_updating};
pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCategory, ErrorCode, Language, StaticContext,
    StaticContextBuilder,
};
pub use model::simple::{SimpleNode, SimpleNodeBuilder, attr, doc as simple_doc, elem, text};
pub use model::{DocumentWriter, NodeFactory, NodeKind, QName, XdmNode};
pub use update::{ApplyReport, PendingUpdate, PendingUpdateList};
pub use xdm::{ExpandedName, Sequence, XdmArray, XdmAtomicValue, XdmItem, XdmMap, XdmSequence};
