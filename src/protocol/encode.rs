//! Packet encoding

use super::constants::{client_info, client_packet, compression, query_stage, revision};
use super::message::{ClientInfo, ClientPacket};
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a client packet for a session negotiated at `server_revision`
pub fn encode_packet(msg: &ClientPacket, server_revision: u64) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        ClientPacket::Hello {
            client_name,
            version_major,
            version_minor,
            revision,
            database,
            user,
            password,
        } => {
            put_uvarint(&mut buf, client_packet::HELLO);
            put_string(&mut buf, client_name);
            put_uvarint(&mut buf, *version_major);
            put_uvarint(&mut buf, *version_minor);
            put_uvarint(&mut buf, *revision);
            put_string(&mut buf, database);
            put_string(&mut buf, user);
            put_string(&mut buf, password);
        }
        ClientPacket::Query {
            query_id,
            client_info,
            query,
        } => {
            encode_query(&mut buf, query_id, client_info, query, server_revision);
        }
        ClientPacket::EmptyData => {
            encode_empty_data(&mut buf, server_revision);
        }
        ClientPacket::Ping => {
            put_uvarint(&mut buf, client_packet::PING);
        }
    }

    Ok(buf)
}

fn encode_query(
    buf: &mut BytesMut,
    query_id: &str,
    info: &ClientInfo,
    query: &str,
    server_revision: u64,
) {
    put_uvarint(buf, client_packet::QUERY);
    put_string(buf, query_id);

    if server_revision >= revision::MIN_WITH_CLIENT_INFO {
        buf.put_u8(client_info::QUERY_KIND_INITIAL);
        put_string(buf, ""); // initial user
        put_string(buf, ""); // initial query id
        put_string(buf, &info.initial_address);
        buf.put_u8(client_info::INTERFACE_TCP);
        put_string(buf, &info.os_user);
        put_string(buf, &info.client_hostname);
        put_string(buf, &info.client_name);
        put_uvarint(buf, info.version_major);
        put_uvarint(buf, info.version_minor);
        put_uvarint(buf, info.revision);
        if server_revision >= revision::MIN_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            put_string(buf, &info.quota_key);
        }
    }

    // No settings: the list is terminated by an empty name
    put_string(buf, "");

    put_uvarint(buf, query_stage::COMPLETE);
    put_uvarint(buf, compression::DISABLED);
    put_string(buf, query);
}

fn encode_empty_data(buf: &mut BytesMut, server_revision: u64) {
    put_uvarint(buf, client_packet::DATA);
    if server_revision >= revision::MIN_WITH_TEMPORARY_TABLES {
        put_string(buf, "");
    }
    if server_revision >= revision::MIN_WITH_BLOCK_INFO {
        put_uvarint(buf, 1);
        buf.put_u8(0); // is_overflows
        put_uvarint(buf, 2);
        buf.put_i32_le(-1); // bucket_num
        put_uvarint(buf, 0);
    }
    put_uvarint(buf, 0); // columns
    put_uvarint(buf, 0); // rows
}

/// Append an unsigned LEB128 integer
pub fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Append a length-prefixed string
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_uvarint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}
