use crate::dataset::ChatSample;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Datasets strictly larger than this get a held-out evaluation split.
pub const EVAL_SPLIT_THRESHOLD: usize = 20;

/// Fraction of records held out for evaluation.
pub const EVAL_FRACTION: f64 = 0.1;

/// Seed used for the train/eval shuffle.
pub const SPLIT_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<ChatSample>,
    pub eval: Option<Vec<ChatSample>>,
}

impl DatasetSplit {
    #[must_use]
    pub fn eval_len(&self) -> usize {
        self.eval.as_ref().map_or(0, Vec::len)
    }
}

/// Split off an evaluation set when the dataset exceeds
/// [`EVAL_SPLIT_THRESHOLD`].
///
/// The eval set holds `ceil(n * EVAL_FRACTION)` records drawn by a seeded
/// shuffle; the remaining records keep shuffled order.
#[must_use]
pub fn split_for_eval(samples: Vec<ChatSample>, seed: u64) -> DatasetSplit {
    if samples.len() <= EVAL_SPLIT_THRESHOLD {
        return DatasetSplit { train: samples, eval: None };
    }

    let n = samples.len();
    let eval_len = ((n as f64) * EVAL_FRACTION).ceil() as usize;

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut slots: Vec<Option<ChatSample>> = samples.into_iter().map(Some).collect();
    let mut take = |i: usize| slots[i].take();

    let eval: Vec<ChatSample> = indices[..eval_len].iter().filter_map(|&i| take(i)).collect();
    let train: Vec<ChatSample> = indices[eval_len..].iter().filter_map(|&i| take(i)).collect();

    DatasetSplit { train, eval: Some(eval) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<ChatSample> {
        (0..n).map(|i| ChatSample { text: format!("sample-{i}") }).collect()
    }

    #[test]
    fn test_twenty_records_do_not_split() {
        let split = split_for_eval(samples(20), SPLIT_SEED);
        assert!(split.eval.is_none());
        assert_eq!(split.train.len(), 20);
        assert_eq!(split.train[0].text, "sample-0");
    }

    #[test]
    fn test_twenty_one_records_split() {
        let split = split_for_eval(samples(21), SPLIT_SEED);
        assert_eq!(split.eval_len(), 3);
        assert_eq!(split.train.len(), 18);
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let a = split_for_eval(samples(50), SPLIT_SEED);
        let b = split_for_eval(samples(50), SPLIT_SEED);
        assert_eq!(a.eval, b.eval);

        let eval = a.eval.unwrap();
        assert_eq!(eval.len(), 5);
        assert!(eval.iter().all(|e| !a.train.contains(e)));
        assert_eq!(a.train.len() + eval.len(), 50);
    }
}
