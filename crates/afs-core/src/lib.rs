mod archive;
mod data;
mod dependency;
mod error;
mod events;
mod id;
mod node;
mod storage;

pub use archive::StorageArchive;
pub use data::{
    check_data_source_attribute, data_source_file_name, file_name_data_name,
    suffix_ext_data_name, DataSource, DataWriter, NodeDataSource,
};
pub use dependency::{AddOutcome, DependencyGraph, Edge};
pub use error::{Result, StorageError};
pub use events::{EventListener, EventsBus, ListenerError, ListenerId, NodeEvent, StorageEvent};
pub use id::{NodeId, PseudoClass};
pub use node::{now_millis, NewNode, NodeDependency, NodeGenericMetadata, NodeInfo};
pub use storage::{check_metadata, check_node_name, AppFileSystemStorage, PROJECT_ROOT_NAME};
