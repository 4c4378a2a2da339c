// Tuple page

// Page layout:
// 4 byte: tuple count (big endian)
// tuples back to back, attributes in schema order:
//   Int    -> 8 byte big endian i64
//   Float  -> 8 byte big endian f64
//   String -> 1 byte length + utf-8 bytes
// unused tail of the page is zero filled.
//
// Run pages are transient and read once, so there is no slot directory,
// tuple id or status byte. A tuple never straddles two pages.

use std::ops::{Deref, DerefMut};

use crate::{
    catalog::SchemaRef,
    config::PAGE_HEADER_SIZE,
    error::ExecError,
    field::{DataType, Field},
    tuple::Tuple,
};

#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    pub fn new_empty(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn tuple_count(&self) -> Result<u32, ExecError> {
        let header: [u8; 4] = self
            .data
            .get(..PAGE_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                ExecError::MalformedPage(format!("page of {} bytes has no header", self.data.len()))
            })?;
        Ok(u32::from_be_bytes(header))
    }

    fn set_tuple_count(&mut self, count: u32) {
        self.data[..PAGE_HEADER_SIZE].copy_from_slice(&count.to_be_bytes());
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("capacity", &self.capacity())
            .field("tuple_count", &self.tuple_count().ok())
            .finish()
    }
}

/// Fills one page tuple by tuple.
pub struct PageBuilder {
    schema: SchemaRef,
    buf: Vec<u8>,
    count: u32,
    capacity: usize,
}

impl PageBuilder {
    pub fn new(schema: SchemaRef, capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(&[0; PAGE_HEADER_SIZE]);
        Self {
            schema,
            buf,
            count: 0,
            capacity,
        }
    }

    /// Appends the tuple if it fits in the remaining space.
    /// Returns false, leaving the page untouched, when it does not.
    /// A tuple that does not match the schema, or could not fit even an
    /// empty page, is an error and nothing is written.
    pub fn try_append(&mut self, tuple: &Tuple) -> Result<bool, ExecError> {
        self.schema.check_tuple(tuple)?;
        let size = tuple.encoded_size()?;
        if PAGE_HEADER_SIZE + size > self.capacity {
            return Err(ExecError::OversizedTuple {
                size,
                capacity: self.capacity,
            });
        }
        if self.buf.len() + size > self.capacity {
            return Ok(false);
        }
        tuple.encode_into(&mut self.buf)?;
        self.count += 1;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(self) -> Page {
        let mut page = Page::from_bytes(self.buf);
        page.data.resize(self.capacity, 0);
        page.set_tuple_count(self.count);
        page
    }
}

/// Translates between tuples of one schema and pages of one capacity.
#[derive(Debug, Clone)]
pub struct PageCodec {
    schema: SchemaRef,
    page_size: usize,
}

impl PageCodec {
    pub fn new(schema: SchemaRef, page_size: usize) -> Self {
        Self { schema, page_size }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn builder(&self) -> PageBuilder {
        PageBuilder::new(self.schema.clone(), self.page_size)
    }

    /// Encoded size of `tuple`, or an error if it can never fit a page.
    pub fn checked_size(&self, tuple: &Tuple) -> Result<usize, ExecError> {
        let size = tuple.encoded_size()?;
        if PAGE_HEADER_SIZE + size > self.page_size {
            return Err(ExecError::OversizedTuple {
                size,
                capacity: self.page_size,
            });
        }
        Ok(size)
    }

    /// Packs a prefix of `tuples` into one page. Returns the page and the
    /// number of tuples it holds, or `None` when `tuples` is empty.
    pub fn encode_page(&self, tuples: &[Tuple]) -> Result<Option<(Page, usize)>, ExecError> {
        if tuples.is_empty() {
            return Ok(None);
        }
        let mut builder = self.builder();
        for tuple in tuples {
            if !builder.try_append(tuple)? {
                break;
            }
        }
        let n = builder.len();
        Ok(Some((builder.finish(), n)))
    }

    /// Packs all of `tuples` into as many pages as needed, in order.
    pub fn encode(&self, tuples: &[Tuple]) -> Result<Vec<Page>, ExecError> {
        let mut pages = Vec::new();
        let mut start = 0;
        while let Some((page, n)) = self.encode_page(&tuples[start..])? {
            start += n;
            pages.push(page);
        }
        Ok(pages)
    }

    pub fn decode(&self, page: &Page) -> Result<Vec<Tuple>, ExecError> {
        if page.capacity() != self.page_size {
            return Err(ExecError::MalformedPage(format!(
                "page has {} bytes, expected {}",
                page.capacity(),
                self.page_size
            )));
        }
        let count = page.tuple_count()? as usize;
        let min_tuple_size: usize = self
            .schema
            .columns()
            .iter()
            .map(|c| match c.data_type() {
                DataType::Int | DataType::Float => 8,
                DataType::String => 1,
            })
            .sum();
        if count.saturating_mul(min_tuple_size.max(1)) > self.page_size - PAGE_HEADER_SIZE {
            return Err(ExecError::MalformedPage(format!(
                "declared {} tuples cannot fit {} bytes",
                count,
                self.page_size - PAGE_HEADER_SIZE
            )));
        }

        let mut tuples = Vec::with_capacity(count);
        let mut offset = PAGE_HEADER_SIZE;
        for _ in 0..count {
            let mut fields = Vec::with_capacity(self.schema.len());
            for col in self.schema.columns() {
                let (field, used) = Field::decode(col.data_type(), &page[offset..])?;
                offset += used;
                fields.push(field);
            }
            tuples.push(Tuple::from_fields(fields));
        }
        Ok(tuples)
    }
}
