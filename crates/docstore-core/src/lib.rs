#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod connector;
pub mod descriptor;
pub mod error;
pub mod fusion;
pub mod traits;
pub mod types;

pub use connector::{Connector, ConnectorOutput};
pub use descriptor::{
    DenseMatch, DescriptorKind, Fusion, FusionMethod, Metric, OrderBy, QueryDescriptor, SortDirection, TextMatch,
};
pub use error::{ConnectorError, Result, SearchError, ValidationError};
pub use traits::{Backend, SearchScope};
pub use types::{CollectionDiagnostics, CollectionRef, CollectionStatus, NativeHit, ResultRow, SearchRequest, SearchResponse};
