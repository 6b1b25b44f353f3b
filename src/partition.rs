use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffles `items` in place, so that batches built from it get a similar mix
/// of small and large inputs.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    items.shuffle(rng);
}

/// Splits `items` into exactly `batches` contiguous batches of `ceil(len / batches)`
/// elements. Trailing batches may be shorter or empty.
pub fn partition_into<T: Clone>(items: &[T], batches: usize) -> Vec<Vec<T>> {
    let batches = batches.max(1);
    let batch_size = (items.len() + batches - 1) / batches;
    (0..batches)
        .map(|i| {
            let start = (i * batch_size).min(items.len());
            let end = ((i + 1) * batch_size).min(items.len());
            items[start..end].to_vec()
        })
        .collect()
}

/// Splits `items` into chunks holding at most `max_size` elements.
pub fn partition_by_size<T: Clone>(items: &[T], max_size: usize) -> Vec<Vec<T>> {
    items.chunks(max_size.max(1)).map(<[T]>::to_vec).collect()
}
