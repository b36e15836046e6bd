//! target-mongodb
//!
//! A Singer target that upserts records into MongoDB.
//!
//! Messages are read one per line. `RECORD`s are buffered per stream by the
//! [`accumulator`] and committed in batches through [`mongodb_sink`], keyed by
//! the first of the stream's `key_properties`. `STATE` messages are echoed to
//! stdout once every record received before them has been written.
//!
//! # CLI Usage
//!
//! ```bash
//! tap-something | target-mongodb --config config.json > state.json
//! ```
//!
//! with a config such as
//!
//! ```json
//! {"connection_string": "mongodb://localhost:27017", "db_name": "warehouse"}
//! ```

pub mod accumulator;
pub mod config;
pub mod singer;
pub mod target;

pub use config::Config;
pub use mongodb_sink;
