//! Backend message builders for driving state machines without a server.

use crate::buffer_set::BufferSet;
use crate::protocol::backend::msg_type;
use crate::protocol::types::Oid;

use super::{Action, StateMachine};

/// Put one backend message into `buffer_set` as if it had just been read.
pub fn feed(buffer_set: &mut BufferSet, type_byte: u8, payload: &[u8]) {
    buffer_set.type_byte = type_byte;
    buffer_set.read_buffer.clear();
    buffer_set.read_buffer.extend_from_slice(payload);
}

/// Feed a sequence of messages, returning the action after each one.
pub fn run<M: StateMachine>(
    machine: &mut M,
    buffer_set: &mut BufferSet,
    messages: &[(u8, Vec<u8>)],
) -> Vec<crate::error::Result<Action>> {
    messages
        .iter()
        .map(|(tag, payload)| {
            feed(buffer_set, *tag, payload);
            machine.step(buffer_set)
        })
        .collect()
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub fn ready(status: u8) -> (u8, Vec<u8>) {
    (msg_type::READY_FOR_QUERY, vec![status])
}

pub fn error(code: &str, message: &str) -> (u8, Vec<u8>) {
    let mut out = Vec::new();
    for (field, value) in [(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', message)] {
        out.push(field);
        cstr(&mut out, value);
    }
    out.push(0);
    (msg_type::ERROR_RESPONSE, out)
}

pub fn notice(message: &str) -> (u8, Vec<u8>) {
    let (_, payload) = error("00000", message);
    (msg_type::NOTICE_RESPONSE, payload)
}

pub fn notification(pid: u32, channel: &str, payload: &str) -> (u8, Vec<u8>) {
    let mut out = pid.to_be_bytes().to_vec();
    cstr(&mut out, channel);
    cstr(&mut out, payload);
    (msg_type::NOTIFICATION_RESPONSE, out)
}

pub fn parameter_status(name: &str, value: &str) -> (u8, Vec<u8>) {
    let mut out = Vec::new();
    cstr(&mut out, name);
    cstr(&mut out, value);
    (msg_type::PARAMETER_STATUS, out)
}

pub fn auth(code: u32, extra: &[u8]) -> (u8, Vec<u8>) {
    let mut out = code.to_be_bytes().to_vec();
    out.extend_from_slice(extra);
    (msg_type::AUTHENTICATION, out)
}

pub fn backend_key(pid: u32, secret: u32) -> (u8, Vec<u8>) {
    let mut out = pid.to_be_bytes().to_vec();
    out.extend_from_slice(&secret.to_be_bytes());
    (msg_type::BACKEND_KEY_DATA, out)
}

/// RowDescription with `(name, type oid, format)` columns.
pub fn row_description(columns: &[(&str, Oid, u16)]) -> (u8, Vec<u8>) {
    let mut out = (columns.len() as u16).to_be_bytes().to_vec();
    for (name, oid, format) in columns {
        cstr(&mut out, name);
        out.extend_from_slice(&0_u32.to_be_bytes());
        out.extend_from_slice(&0_i16.to_be_bytes());
        out.extend_from_slice(&oid.to_be_bytes());
        out.extend_from_slice(&(-1_i16).to_be_bytes());
        out.extend_from_slice(&(-1_i32).to_be_bytes());
        out.extend_from_slice(&format.to_be_bytes());
    }
    (msg_type::ROW_DESCRIPTION, out)
}

pub fn data_row(values: &[Option<&[u8]>]) -> (u8, Vec<u8>) {
    let mut out = (values.len() as u16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(bytes) => {
                out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    (msg_type::DATA_ROW, out)
}

pub fn command_complete(tag: &str) -> (u8, Vec<u8>) {
    let mut out = Vec::new();
    cstr(&mut out, tag);
    (msg_type::COMMAND_COMPLETE, out)
}

pub fn parameter_description(oids: &[Oid]) -> (u8, Vec<u8>) {
    let mut out = (oids.len() as u16).to_be_bytes().to_vec();
    for oid in oids {
        out.extend_from_slice(&oid.to_be_bytes());
    }
    (msg_type::PARAMETER_DESCRIPTION, out)
}

/// CopyInResponse or CopyOutResponse for `columns` text columns.
pub fn copy_response(type_byte: u8, columns: u16) -> (u8, Vec<u8>) {
    let mut out = vec![0];
    out.extend_from_slice(&columns.to_be_bytes());
    for _ in 0..columns {
        out.extend_from_slice(&0_u16.to_be_bytes());
    }
    (type_byte, out)
}

pub fn empty(type_byte: u8) -> (u8, Vec<u8>) {
    (type_byte, Vec::new())
}

/// Split a frontend byte stream into `(type, payload)` pairs.
pub fn frontend_messages(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while bytes.len() >= 5 {
        let tag = bytes[0];
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        out.push((tag, bytes[5..1 + len].to_vec()));
        bytes = &bytes[1 + len..];
    }
    out
}

/// Message type bytes of a frontend byte stream.
pub fn frontend_tags(bytes: &[u8]) -> Vec<u8> {
    frontend_messages(bytes).into_iter().map(|(t, _)| t).collect()
}
