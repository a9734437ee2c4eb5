//! Beam search decoding over a next-token scoring function.

struct Beam {
    tokens: Vec<u32>,
    score: f64,
}

struct Candidate {
    score: f64,
    beam: usize,
    token: u32,
}

/// Finished sequences, capped at `num_beams`.
struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f64,
    early_stopping: bool,
    hyps: Vec<(f64, Vec<u32>)>,
    worst_score: f64,
}

impl BeamHypotheses {
    fn new(num_beams: usize, length_penalty: f64, early_stopping: bool) -> Self {
        Self {
            num_beams,
            length_penalty,
            early_stopping,
            hyps: Vec::with_capacity(num_beams + 1),
            worst_score: f64::INFINITY,
        }
    }

    fn normalize(&self, sum_logprobs: f64, len: usize) -> f64 {
        sum_logprobs / (len as f64).powf(self.length_penalty)
    }

    fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f64) {
        let score = self.normalize(sum_logprobs, tokens.len());
        if self.hyps.len() < self.num_beams || score > self.worst_score {
            self.hyps.push((score, tokens));
            if self.hyps.len() > self.num_beams {
                if let Some(worst) = self
                    .hyps
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                    .map(|(idx, _)| idx)
                {
                    self.hyps.remove(worst);
                }
                self.worst_score = self
                    .hyps
                    .iter()
                    .map(|(s, _)| *s)
                    .fold(f64::INFINITY, f64::min);
            } else {
                self.worst_score = self.worst_score.min(score);
            }
        }
    }

    fn is_done(&self, best_sum_logprobs: f64, cur_len: usize) -> bool {
        if self.hyps.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst_score >= self.normalize(best_sum_logprobs, cur_len)
    }

    fn best(self) -> Option<Vec<u32>> {
        // first inserted wins ties
        self.hyps
            .into_iter()
            .rev()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, tokens)| tokens)
    }
}

/// Deterministic beam search: no sampling, ties broken by beam index then
/// token id.
#[derive(Debug, Clone)]
pub struct BeamSearch {
    pub num_beams: usize,
    /// total sequence length, prompt included
    pub max_length: usize,
    pub eos_token_id: u32,
    pub length_penalty: f64,
    pub early_stopping: bool,
}

impl BeamSearch {
    pub fn new(num_beams: usize, max_length: usize, eos_token_id: u32) -> Self {
        Self {
            num_beams: num_beams.max(1),
            max_length,
            eos_token_id,
            length_penalty: 1.0,
            early_stopping: false,
        }
    }

    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn with_length_penalty(mut self, length_penalty: f64) -> Self {
        self.length_penalty = length_penalty;
        self
    }

    /// Extends `prompt` until `max_length` or until enough sequences ended.
    ///
    /// `next_log_probs` gets a full sequence and returns log-probabilities
    /// over the vocabulary for the token that follows it. The returned
    /// sequence keeps the prompt and drops the end token.
    pub fn generate<F, E>(&self, prompt: &[u32], mut next_log_probs: F) -> Result<Vec<u32>, E>
    where
        F: FnMut(&[u32]) -> Result<Vec<f32>, E>,
    {
        let num_beams = self.num_beams.max(1);
        let num_candidates = 2 * num_beams;

        let mut beams = vec![Beam {
            tokens: prompt.to_vec(),
            score: 0.0,
        }];
        let mut hyps = BeamHypotheses::new(num_beams, self.length_penalty, self.early_stopping);
        let mut done = false;

        while !done && beams[0].tokens.len() < self.max_length {
            let mut candidates = Vec::with_capacity(beams.len() * num_candidates);
            for (beam_idx, beam) in beams.iter().enumerate() {
                let log_probs = next_log_probs(&beam.tokens)?;
                for (token, log_prob) in top_k(&log_probs, num_candidates) {
                    candidates.push(Candidate {
                        score: beam.score + log_prob as f64,
                        beam: beam_idx,
                        token,
                    });
                }
            }

            candidates.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.beam.cmp(&b.beam))
                    .then(a.token.cmp(&b.token))
            });
            candidates.truncate(num_candidates);

            let mut next = Vec::with_capacity(num_beams);
            for (rank, candidate) in candidates.iter().enumerate() {
                let beam = &beams[candidate.beam];
                if candidate.token == self.eos_token_id {
                    if rank < num_beams {
                        hyps.add(beam.tokens.clone(), candidate.score);
                    }
                } else {
                    let mut tokens = Vec::with_capacity(beam.tokens.len() + 1);
                    tokens.extend_from_slice(&beam.tokens);
                    tokens.push(candidate.token);
                    next.push(Beam {
                        tokens,
                        score: candidate.score,
                    });
                }
                if next.len() == num_beams {
                    break;
                }
            }

            if next.is_empty() {
                // every candidate ended the sequence
                done = true;
                break;
            }

            beams = next;
            done = hyps.is_done(beams[0].score, beams[0].tokens.len());
        }

        if !done {
            for beam in beams {
                hyps.add(beam.tokens, beam.score);
            }
        }

        Ok(hyps.best().unwrap_or_else(|| prompt.to_vec()))
    }
}

/// The `k` highest entries as `(token, log_prob)`, best first.
fn top_k(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = log_probs
        .iter()
        .enumerate()
        .filter(|(_, lp)| !lp.is_nan())
        .map(|(idx, lp)| (idx as u32, *lp))
        .collect();

    let k = k.min(indexed.len());
    if k == 0 {
        return vec![];
    }

    let cmp = |a: &(u32, f32), b: &(u32, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    if k < indexed.len() {
        indexed.select_nth_unstable_by(k - 1, cmp);
        indexed.truncate(k);
    }
    indexed.sort_by(cmp);
    indexed
}
