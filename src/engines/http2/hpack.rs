//! HPACK header compression (RFC 7541) without Huffman coding.

use std::collections::VecDeque;

use super::error::{ErrorCode, Http2Error};

pub const DEFAULT_TABLE_SIZE: usize = 4096;
const ENTRY_OVERHEAD: usize = 32;

pub const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

fn compression_error(reason: &str) -> Http2Error {
    Http2Error::connection(ErrorCode::Compression, reason)
}

pub fn encode_integer(value: usize, prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        out.push(flags | value as u8);
        return;
    }
    out.push(flags | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        out.push((rest % 128 + 128) as u8);
        rest /= 128;
    }
    out.push(rest as u8);
}

/// Decodes a prefixed integer; returns the value and the bytes consumed.
pub fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<(usize, usize), Http2Error> {
    let first = *buf.first().ok_or_else(|| compression_error("truncated integer"))?;
    let max = (1usize << prefix_bits) - 1;
    let mut value = usize::from(first) & max;
    if value < max {
        return Ok((value, 1));
    }
    let mut shift = 0u32;
    let mut index = 1;
    loop {
        let byte = *buf.get(index).ok_or_else(|| compression_error("truncated integer"))?;
        index += 1;
        if shift > 28 {
            return Err(compression_error("integer overflow"));
        }
        value += usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, index));
        }
        shift += 7;
    }
}

pub fn encode_string(value: &str, out: &mut Vec<u8>) {
    encode_integer(value.len(), 7, 0, out);
    out.extend_from_slice(value.as_bytes());
}

pub fn decode_string(buf: &[u8]) -> Result<(String, usize), Http2Error> {
    let first = *buf.first().ok_or_else(|| compression_error("truncated string"))?;
    if first & 0x80 != 0 {
        return Err(compression_error("Huffman-coded strings are not supported"));
    }
    let (length, used) = decode_integer(buf, 7)?;
    let end = used
        .checked_add(length)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| compression_error("truncated string"))?;
    let value = String::from_utf8(buf[used..end].to_vec())
        .map_err(|_| compression_error("non UTF-8 header string"))?;
    Ok((value, end))
}

/// FIFO dynamic table; entry size is name + value + 32 octets.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl Default for DynamicTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            match self.entries.pop_back() {
                Some((name, value)) => self.size -= Self::entry_size(&name, &value),
                None => break,
            }
        }
    }

    pub fn insert(&mut self, name: String, value: String) {
        let size = Self::entry_size(&name, &value);
        if size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - size);
        self.size += size;
        self.entries.push_front((name, value));
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    /// Entry at a 0-based position from the newest.
    pub fn get(&self, position: usize) -> Option<&(String, String)> {
        self.entries.get(position)
    }

    fn position_of(&self, name: &str, value: Option<&str>) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, v)| n == name && value.map(|value| v == value).unwrap_or(true))
    }
}

fn lookup(table: &DynamicTable, index: usize) -> Result<(String, String), Http2Error> {
    if index == 0 {
        return Err(compression_error("index 0"));
    }
    if index <= STATIC_TABLE.len() {
        let (name, value) = STATIC_TABLE[index - 1];
        return Ok((name.to_string(), value.to_string()));
    }
    table
        .get(index - STATIC_TABLE.len() - 1)
        .cloned()
        .ok_or_else(|| compression_error("index outside the dynamic table"))
}

fn is_sensitive(name: &str) -> bool {
    matches!(name, "authorization" | "proxy-authorization")
}

#[derive(Debug, Clone, Default)]
pub struct Encoder {
    table: DynamicTable,
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Follows the peer's SETTINGS_HEADER_TABLE_SIZE; the change is signalled
    /// at the start of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        let size = size.min(DEFAULT_TABLE_SIZE);
        if size != self.table.max_size() {
            self.table.set_max_size(size);
            self.pending_size_update = Some(size);
        }
    }

    pub fn encode(&mut self, headers: &[(String, String)]) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(size) = self.pending_size_update.take() {
            encode_integer(size, 5, 0x20, &mut out);
        }
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            if is_sensitive(&name) {
                let index = STATIC_TABLE.iter().position(|(n, _)| *n == name).map(|i| i + 1);
                self.encode_literal(&name, value, index, 4, 0x10, &mut out);
                continue;
            }
            if let Some(index) = STATIC_TABLE
                .iter()
                .position(|(n, v)| *n == name && *v == value.as_str())
                .map(|i| i + 1)
                .or_else(|| {
                    self.table
                        .position_of(&name, Some(value))
                        .map(|p| p + STATIC_TABLE.len() + 1)
                })
            {
                encode_integer(index, 7, 0x80, &mut out);
                continue;
            }
            let name_index = STATIC_TABLE
                .iter()
                .position(|(n, _)| *n == name)
                .map(|i| i + 1)
                .or_else(|| {
                    self.table
                        .position_of(&name, None)
                        .map(|p| p + STATIC_TABLE.len() + 1)
                });
            self.encode_literal(&name, value, name_index, 6, 0x40, &mut out);
            self.table.insert(name, value.clone());
        }
        out
    }

    fn encode_literal(
        &self,
        name: &str,
        value: &str,
        name_index: Option<usize>,
        prefix_bits: u8,
        flags: u8,
        out: &mut Vec<u8>,
    ) {
        match name_index {
            Some(index) => encode_integer(index, prefix_bits, flags, out),
            None => {
                out.push(flags);
                encode_string(name, out);
            }
        }
        encode_string(value, out);
    }
}

#[derive(Debug, Clone)]
pub struct Decoder {
    table: DynamicTable,
    /// Upper bound for table size updates: our acknowledged HEADER_TABLE_SIZE.
    max_allowed: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            table: DynamicTable::default(),
            max_allowed: DEFAULT_TABLE_SIZE,
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    pub fn max_allowed(&self) -> usize {
        self.max_allowed
    }

    /// Applies an acknowledged local HEADER_TABLE_SIZE.
    pub fn set_max_allowed(&mut self, size: usize) {
        self.max_allowed = size;
        if self.table.max_size() > size {
            self.table.set_max_size(size);
        }
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>, Http2Error> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < block.len() {
            let byte = block[pos];
            let rest = &block[pos..];
            if byte & 0x80 != 0 {
                let (index, used) = decode_integer(rest, 7)?;
                headers.push(lookup(&self.table, index)?);
                pos += used;
            } else if byte & 0x40 != 0 {
                let (name, value, used) = self.decode_literal(rest, 6)?;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
                pos += used;
            } else if byte & 0x20 != 0 {
                let (size, used) = decode_integer(rest, 5)?;
                if size > self.max_allowed {
                    return Err(compression_error("table size update above the allowed maximum"));
                }
                self.table.set_max_size(size);
                pos += used;
            } else {
                // 0001xxxx never indexed, 0000xxxx without indexing
                let (name, value, used) = self.decode_literal(rest, 4)?;
                headers.push((name, value));
                pos += used;
            }
        }
        Ok(headers)
    }

    fn decode_literal(&self, buf: &[u8], prefix_bits: u8) -> Result<(String, String, usize), Http2Error> {
        let (index, mut used) = decode_integer(buf, prefix_bits)?;
        let name = if index == 0 {
            let (name, n) = decode_string(&buf[used..])?;
            used += n;
            name
        } else {
            lookup(&self.table, index)?.0
        };
        let (value, n) = decode_string(&buf[used..])?;
        used += n;
        Ok((name, value, used))
    }
}
