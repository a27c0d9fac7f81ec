pub mod activity;
pub mod dates;
pub mod link;
pub mod node_id;
