/// Splits `input` into ordered chunks of at most `chunk_size` items.
///
/// An empty input yields no chunks at all. `chunk_size` must be positive.
pub fn break_into_chunks<T: Clone>(input: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    input.chunks(chunk_size).map(|chunk| chunk.to_vec()).collect()
}
