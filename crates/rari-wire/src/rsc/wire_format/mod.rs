pub mod escape;
pub mod record;
pub mod row;
pub mod serializer;

pub use record::WireNode;
pub use row::{ROOT_ROW_ID, Row, RowPayload, RowReader, RowTag, parse_rows};
pub use serializer::{EncodeOptions, RscByteStream, RscSerializer, encode};
