//! Shared fixtures for the connector benchmarks.

/// A captured message, embedded at compile time.
#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}

/// How the bytes of a file reach the decoder.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// All at once, as if one read returned the whole message.
    Whole,
    /// In reads of at most this many bytes.
    Split(usize),
}

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    delivery: Delivery,
    file: TestFile,
}

impl TestCase {
    pub fn whole(name: &'static str, file: TestFile) -> Self {
        Self { name, delivery: Delivery::Whole, file }
    }

    pub fn split(name: &'static str, file: TestFile, read_size: usize) -> Self {
        Self { name, delivery: Delivery::Split(read_size.max(1)), file }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }

    /// The content cut into the reads the decoder is fed with.
    pub fn reads(&self) -> Vec<&'static [u8]> {
        let bytes = self.file.content().as_bytes();
        match self.delivery {
            Delivery::Whole => vec![bytes],
            Delivery::Split(size) => bytes.chunks(size).collect(),
        }
    }
}
