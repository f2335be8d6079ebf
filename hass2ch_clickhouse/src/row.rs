use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use snafu::ResultExt;

use crate::error::{EncodeSnafu, Result};

/// Encodes `rows` as newline delimited JSON objects.
pub fn encode_json_each_row<T: Serialize>(rows: &[T]) -> Result<Bytes> {
    let mut writer = BytesMut::with_capacity(rows.len() * 256).writer();

    for row in rows {
        serde_json::to_writer(&mut writer, row).context(EncodeSnafu {})?;
        writer.get_mut().put_u8(b'\n');
    }

    Ok(writer.into_inner().freeze())
}
