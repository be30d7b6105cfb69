pub mod annotate;
pub mod cache;
pub mod client;
pub mod config;
pub mod dom;
pub mod error;
pub mod lookup;
pub mod resolver;
pub mod scanner;
pub mod shape;
pub mod sparql;
pub mod wiki;

pub use annotate::{AnnotatedDocument, Annotator, TagOutcome};
pub use cache::{memo_key, MemoCache, MemoryCache};
pub use client::{ClientConfig, HttpClient};
pub use config::{
    is_entity_id, Context, GraphConfig, Qid, Registry, DEFAULT_ENTITY_TYPE, DEFAULT_LANGUAGE,
    DEFAULT_NAMESPACE,
};
pub use error::{Error, Result};
pub use lookup::LookupService;
pub use resolver::{EntityRecord, Resolver};
pub use scanner::{AnnotationEntity, CustomComponent, MapFigure, ScanResult};
