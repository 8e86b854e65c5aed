use std::io::{self, BufRead, Cursor};

/// Splits delimited text into a header and batches of data lines.
///
/// The first line is read eagerly as the header. The remaining lines are
/// yielded in batches of `batch_size`, each line terminated by `'\n'`, so a
/// batch is a self-contained block of rows ready for an extractor.
#[derive(Debug)]
pub struct LineBatches<R> {
    reader: R,
    header: Vec<String>,
    batch_size: usize,
    done: bool,
}

impl<R: BufRead> LineBatches<R> {
    /// Read the header from `reader`. A `batch_size` of zero is treated as one.
    pub fn new(mut reader: R, batch_size: usize) -> io::Result<Self> {
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        let header = if read == 0 {
            Vec::new()
        } else {
            trim_newline(&line)
                .split(',')
                .map(|column| column.trim().to_string())
                .collect()
        };
        Ok(Self {
            reader,
            header,
            batch_size: batch_size.max(1),
            done: read == 0,
        })
    }

    /// Column names from the first line
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl LineBatches<Cursor<String>> {
    /// Batches over an in-memory payload
    pub fn from_text(text: impl Into<String>, batch_size: usize) -> io::Result<Self> {
        Self::new(Cursor::new(text.into()), batch_size)
    }
}

impl<R: BufRead> Iterator for LineBatches<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = String::new();
        let mut lines = 0;
        let mut line = String::new();
        while lines < self.batch_size {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(_) => {
                    let row = trim_newline(&line);
                    if row.is_empty() {
                        continue;
                    }
                    batch.push_str(row);
                    batch.push('\n');
                    lines += 1;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if lines == 0 {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

fn trim_newline(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}
