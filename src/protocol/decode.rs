//! Packet decoding
//!
//! Decoding works on whatever bytes are buffered. A packet that is not yet
//! complete yields `UnexpectedEof`, and the caller reads more and retries.

use super::constants::{revision, server_packet, MAX_STRING_LENGTH};
use super::message::{
    BlockSummary, ColumnHeader, Progress, ProfileInfo, ServerException, ServerInfo, ServerPacket,
};
use std::io;

/// Nested exceptions deeper than this are rejected
const MAX_EXCEPTION_DEPTH: usize = 32;

/// Decode one server packet from the front of `data`
///
/// # Returns
/// `Ok((packet, consumed))` - Packet and number of bytes consumed
/// `Err(e)` - `UnexpectedEof` if more bytes are needed, `InvalidData` otherwise
pub fn decode_packet(data: &[u8], server_revision: u64) -> io::Result<(ServerPacket, usize)> {
    let mut r = Reader::new(data);
    let code = r.uvarint()?;

    let packet = match code {
        server_packet::HELLO => ServerPacket::Hello(decode_hello(&mut r, server_revision)?),
        server_packet::DATA => ServerPacket::Data(decode_block(&mut r, server_revision)?),
        server_packet::EXCEPTION => ServerPacket::Exception(decode_exception(&mut r, 0)?),
        server_packet::PROGRESS => ServerPacket::Progress(decode_progress(&mut r, server_revision)?),
        server_packet::PONG => ServerPacket::Pong,
        server_packet::END_OF_STREAM => ServerPacket::EndOfStream,
        server_packet::PROFILE_INFO => ServerPacket::ProfileInfo(decode_profile_info(&mut r)?),
        server_packet::TOTALS => ServerPacket::Totals(decode_block(&mut r, server_revision)?),
        server_packet::EXTREMES => ServerPacket::Extremes(decode_block(&mut r, server_revision)?),
        server_packet::LOG => ServerPacket::Log(decode_block(&mut r, server_revision)?),
        server_packet::TABLE_COLUMNS => ServerPacket::TableColumns {
            table: r.string()?,
            columns: r.string()?,
        },
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown server packet: {}", code),
            ))
        }
    };

    Ok((packet, r.pos))
}

fn decode_hello(r: &mut Reader<'_>, client_revision: u64) -> io::Result<ServerInfo> {
    let name = r.string()?;
    let version_major = r.uvarint()?;
    let version_minor = r.uvarint()?;
    let server_revision = r.uvarint()?;
    // The server decides what to send from the client revision
    let effective = server_revision.min(client_revision);

    let timezone = if effective >= revision::MIN_WITH_SERVER_TIMEZONE {
        Some(r.string()?)
    } else {
        None
    };
    let display_name = if effective >= revision::MIN_WITH_SERVER_DISPLAY_NAME {
        Some(r.string()?)
    } else {
        None
    };
    let version_patch = if effective >= revision::MIN_WITH_VERSION_PATCH {
        Some(r.uvarint()?)
    } else {
        None
    };

    Ok(ServerInfo {
        name,
        version_major,
        version_minor,
        revision: server_revision,
        timezone,
        display_name,
        version_patch,
    })
}

fn decode_exception(r: &mut Reader<'_>, depth: usize) -> io::Result<ServerException> {
    if depth > MAX_EXCEPTION_DEPTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "exception nesting too deep",
        ));
    }
    let code = r.i32_le()?;
    let name = r.string()?;
    let message = r.string()?;
    let stack_trace = r.string()?;
    let nested = if r.bool()? {
        Some(Box::new(decode_exception(r, depth + 1)?))
    } else {
        None
    };

    Ok(ServerException {
        code,
        name,
        message,
        stack_trace,
        nested,
    })
}

fn decode_progress(r: &mut Reader<'_>, server_revision: u64) -> io::Result<Progress> {
    let rows = r.uvarint()?;
    let bytes = r.uvarint()?;
    let total_rows = if server_revision >= revision::MIN_WITH_TOTAL_ROWS_IN_PROGRESS {
        r.uvarint()?
    } else {
        0
    };
    if server_revision >= revision::MIN_WITH_CLIENT_WRITE_INFO {
        r.uvarint()?; // written rows
        r.uvarint()?; // written bytes
    }
    Ok(Progress {
        rows,
        bytes,
        total_rows,
    })
}

fn decode_profile_info(r: &mut Reader<'_>) -> io::Result<ProfileInfo> {
    Ok(ProfileInfo {
        rows: r.uvarint()?,
        blocks: r.uvarint()?,
        bytes: r.uvarint()?,
        applied_limit: r.bool()?,
        rows_before_limit: r.uvarint()?,
        calculated_rows_before_limit: r.bool()?,
    })
}

fn decode_block(r: &mut Reader<'_>, server_revision: u64) -> io::Result<BlockSummary> {
    let table = if server_revision >= revision::MIN_WITH_TEMPORARY_TABLES {
        r.string()?
    } else {
        String::new()
    };

    if server_revision >= revision::MIN_WITH_BLOCK_INFO {
        loop {
            match r.uvarint()? {
                0 => break,
                1 => {
                    r.bool()?; // is_overflows
                }
                2 => {
                    r.i32_le()?; // bucket_num
                }
                field => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown block info field: {}", field),
                    ))
                }
            }
        }
    }

    let column_count = r.uvarint()?;
    let rows = r.uvarint()?;
    let mut columns = Vec::with_capacity(column_count.min(1024) as usize);

    for _ in 0..column_count {
        let name = r.string()?;
        let type_name = r.string()?;
        if rows > 0 {
            skip_column(r, &type_name, rows)?;
        }
        columns.push(ColumnHeader { name, type_name });
    }

    Ok(BlockSummary {
        table,
        columns,
        rows,
    })
}

/// Skip `rows` values of a column without materializing them
fn skip_column(r: &mut Reader<'_>, type_name: &str, rows: u64) -> io::Result<()> {
    if let Some(inner) = strip_wrapper(type_name, "Nullable") {
        r.skip(rows)?; // null map
        return skip_column(r, inner, rows);
    }

    if type_name == "String" {
        for _ in 0..rows {
            let len = r.uvarint()?;
            r.skip(len)?;
        }
        return Ok(());
    }

    match fixed_width(type_name) {
        Some(width) => {
            let total = rows.checked_mul(width).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "column size overflow")
            })?;
            r.skip(total)
        }
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported column type in result: {}", type_name),
        )),
    }
}

/// Byte width of fixed-size column types
fn fixed_width(type_name: &str) -> Option<u64> {
    let width = match type_name {
        "UInt8" | "Int8" | "Bool" => 1,
        "UInt16" | "Int16" | "Date" => 2,
        "UInt32" | "Int32" | "Float32" | "DateTime" | "Date32" | "IPv4" => 4,
        "UInt64" | "Int64" | "Float64" => 8,
        "UInt128" | "Int128" | "UUID" | "IPv6" => 16,
        "UInt256" | "Int256" => 32,
        _ => {
            if type_name.starts_with("Enum8(") {
                1
            } else if type_name.starts_with("Enum16(") {
                2
            } else if type_name.starts_with("DateTime(") {
                4
            } else if type_name.starts_with("DateTime64(") {
                8
            } else if let Some(n) = strip_wrapper(type_name, "FixedString") {
                return n.trim().parse().ok();
            } else if let Some(args) = strip_wrapper(type_name, "Decimal") {
                let precision: u64 = args.split(',').next()?.trim().parse().ok()?;
                match precision {
                    0..=9 => 4,
                    10..=18 => 8,
                    19..=38 => 16,
                    _ => 32,
                }
            } else {
                return None;
            }
        }
    };
    Some(width)
}

/// `Wrapper(Inner)` -> `Inner`
fn strip_wrapper<'a>(type_name: &'a str, wrapper: &str) -> Option<&'a str> {
    type_name
        .strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Cursor over buffered bytes
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn eof(what: &str) -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string())
    }

    fn u8(&mut self) -> io::Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| Self::eof("byte"))?;
        self.pos += 1;
        Ok(b)
    }

    fn bool(&mut self) -> io::Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn i32_le(&mut self) -> io::Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn uvarint(&mut self) -> io::Result<u64> {
        let mut value: u64 = 0;
        for shift in (0..64).step_by(7) {
            let b = self.u8()?;
            value |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"))
    }

    fn string(&mut self) -> io::Result<String> {
        let len = self.uvarint()?;
        if len > MAX_STRING_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "string length {} exceeds maximum allowed {}",
                    len, MAX_STRING_LENGTH
                ),
            ));
        }
        let bytes = self.take(len as usize)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "length overflow"))?;
        if end > self.data.len() {
            return Err(Self::eof("payload"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length overflow"))?;
        self.take(len).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::CLIENT_REVISION;
    use crate::protocol::encode::{put_string, put_uvarint};
    use bytes::{BufMut, BytesMut};

    fn server_hello() -> BytesMut {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::HELLO);
        put_string(&mut buf, "ClickHouse");
        put_uvarint(&mut buf, 23);
        put_uvarint(&mut buf, 8);
        put_uvarint(&mut buf, 54465);
        put_string(&mut buf, "UTC");
        buf
    }

    #[test]
    fn test_decode_hello_negotiates_down() {
        let buf = server_hello();
        let (packet, consumed) = decode_packet(&buf, CLIENT_REVISION).unwrap();
        assert_eq!(consumed, buf.len());
        match packet {
            ServerPacket::Hello(info) => {
                assert_eq!(info.name, "ClickHouse");
                assert_eq!(info.revision, 54465);
                assert_eq!(info.timezone.as_deref(), Some("UTC"));
                assert_eq!(info.display_name, None);
            }
            other => panic!("expected hello, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_incomplete_is_eof() {
        let buf = server_hello();
        let err = decode_packet(&buf[..buf.len() - 1], CLIENT_REVISION).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = decode_packet(&[], CLIENT_REVISION).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_nested_exception() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::EXCEPTION);
        buf.put_i32_le(516);
        put_string(&mut buf, "DB::Exception");
        put_string(&mut buf, "Authentication failed");
        put_string(&mut buf, "");
        buf.put_u8(1);
        buf.put_i32_le(1);
        put_string(&mut buf, "Inner");
        put_string(&mut buf, "cause");
        put_string(&mut buf, "");
        buf.put_u8(0);

        let (packet, consumed) = decode_packet(&buf, CLIENT_REVISION).unwrap();
        assert_eq!(consumed, buf.len());
        match packet {
            ServerPacket::Exception(e) => {
                assert_eq!(e.code, 516);
                assert_eq!(e.message, "Authentication failed");
                assert_eq!(e.nested.unwrap().name, "Inner");
            }
            other => panic!("expected exception, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_data_block_skips_values() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::DATA);
        put_string(&mut buf, "");
        put_uvarint(&mut buf, 1);
        buf.put_u8(0);
        put_uvarint(&mut buf, 2);
        buf.put_i32_le(-1);
        put_uvarint(&mut buf, 0);
        put_uvarint(&mut buf, 2); // columns
        put_uvarint(&mut buf, 2); // rows
        put_string(&mut buf, "n");
        put_string(&mut buf, "UInt8");
        buf.put_slice(&[1, 2]);
        put_string(&mut buf, "s");
        put_string(&mut buf, "Nullable(String)");
        buf.put_slice(&[0, 1]);
        put_string(&mut buf, "ab");
        put_string(&mut buf, "");
        put_uvarint(&mut buf, server_packet::END_OF_STREAM);

        let (packet, consumed) = decode_packet(&buf, CLIENT_REVISION).unwrap();
        assert_eq!(consumed, buf.len() - 1);
        match packet {
            ServerPacket::Data(block) => {
                assert_eq!(block.rows, 2);
                assert_eq!(block.columns.len(), 2);
                assert_eq!(block.columns[1].type_name, "Nullable(String)");
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unsupported_column_type() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::DATA);
        put_string(&mut buf, "");
        put_uvarint(&mut buf, 0);
        put_uvarint(&mut buf, 1);
        put_uvarint(&mut buf, 1);
        put_string(&mut buf, "a");
        put_string(&mut buf, "Array(UInt8)");
        buf.put_slice(&[0; 16]);

        let err = decode_packet(&buf, CLIENT_REVISION).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_rejects_oversized_string() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::HELLO);
        put_uvarint(&mut buf, MAX_STRING_LENGTH + 1);

        let err = decode_packet(&buf, CLIENT_REVISION).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_decode_unknown_packet() {
        let err = decode_packet(&[99], CLIENT_REVISION).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_fixed_width_types() {
        assert_eq!(fixed_width("UInt8"), Some(1));
        assert_eq!(fixed_width("DateTime('UTC')"), Some(4));
        assert_eq!(fixed_width("DateTime64(3, 'UTC')"), Some(8));
        assert_eq!(fixed_width("FixedString(7)"), Some(7));
        assert_eq!(fixed_width("Decimal(20, 4)"), Some(16));
        assert_eq!(fixed_width("Array(String)"), None);
    }
}
