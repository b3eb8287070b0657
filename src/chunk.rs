//! Splitting captured HTML into prompt-sized pieces.
//!
//! Both functions operate on code points, not bytes, so multi-byte text never
//! lands on a broken boundary. Precondition violations are bugs in the caller
//! and panic.

/// Split `text` into consecutive chunks of `chunk_len` code points. Every
/// chunk has length `chunk_len` except possibly the last.
///
/// Panics when `chunk_len` is zero or `text` is shorter than `chunk_len`.
pub fn split_by_len(text: &str, chunk_len: usize) -> Vec<String> {
    if chunk_len == 0 {
        panic!("chunk length cannot be 0");
    }

    let chars: Vec<char> = text.chars().collect();

    if chars.len() < chunk_len {
        panic!(
            "text of {} code points is shorter than the chunk length {}",
            chars.len(),
            chunk_len
        );
    }

    chars
        .chunks(chunk_len)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Split `text` into exactly `bucket_count` chunks whose lengths sum to the
/// input length. The first `len % bucket_count` chunks are one code point
/// longer than the rest.
///
/// Panics when `bucket_count` is zero or `text` is shorter than
/// `bucket_count`.
pub fn split_into_buckets(text: &str, bucket_count: usize) -> Vec<String> {
    if bucket_count == 0 {
        panic!("bucket count must be greater than 0");
    }

    let chars: Vec<char> = text.chars().collect();

    if chars.len() < bucket_count {
        panic!(
            "text of {} code points is shorter than the requested {} buckets",
            chars.len(),
            bucket_count
        );
    }

    let base_len = chars.len() / bucket_count;
    let remainder = chars.len() % bucket_count;

    let mut buckets = Vec::with_capacity(bucket_count);
    let mut start = 0;

    for index in 0..bucket_count {
        let len = base_len + usize::from(index < remainder);
        buckets.push(chars[start..start + len].iter().collect());
        start += len;
    }

    buckets
}
