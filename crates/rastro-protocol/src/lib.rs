pub mod codec;
pub mod crc;
pub mod frame;
pub mod payload;
pub mod sequence;
pub mod stream_parser;

pub use codec::{Gt06Codec, Packet};
pub use frame::{Frame, encode_frame, hex_dump, xor_checksum};
pub use payload::{
    AlarmPayload, CommandKind, CommandResponse, CourseStatus, Gt06Time, HeartbeatPayload,
    LocationPayload, LoginPayload, ServerCommand, decode_coordinate, encode_coordinate,
};
pub use sequence::SerialCounter;
pub use stream_parser::{DrainFrames, StreamParser};
