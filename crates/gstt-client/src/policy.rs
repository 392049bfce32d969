use crate::config::Config;
use crate::types::RecognitionEvent;

/// Decides which decoded events reach the caller and when the session ends.
///
/// Every session's output ends with exactly one `EndOfStream`; nothing is
/// delivered after it.
#[derive(Clone, Debug)]
pub struct EventPolicy {
    continuous: bool,
    interim: bool,
    finals: u64,
    done: bool,
}

impl EventPolicy {
    pub fn new(continuous: bool, interim: bool) -> Self {
        Self {
            continuous,
            interim,
            finals: 0,
            done: false,
        }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.continuous(), config.interim())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finals(&self) -> u64 {
        self.finals
    }

    pub fn apply(&mut self, event: RecognitionEvent) -> Vec<RecognitionEvent> {
        if self.done {
            return Vec::new();
        }

        match event {
            RecognitionEvent::Partial { .. } if !self.interim => Vec::new(),
            RecognitionEvent::Partial { .. } => vec![event],
            RecognitionEvent::Final { .. } => {
                self.finals += 1;
                if self.continuous {
                    vec![event]
                } else {
                    self.done = true;
                    vec![event, RecognitionEvent::EndOfStream]
                }
            }
            RecognitionEvent::EndOfStream => {
                self.done = true;
                vec![RecognitionEvent::EndOfStream]
            }
            RecognitionEvent::Error { .. } => {
                self.done = true;
                vec![event, RecognitionEvent::EndOfStream]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Alternative;
    use proptest::prelude::*;

    fn partial(text: &str) -> RecognitionEvent {
        RecognitionEvent::Partial {
            alternatives: vec![Alternative::new(text, None)],
        }
    }

    fn final_(text: &str) -> RecognitionEvent {
        RecognitionEvent::Final {
            alternatives: vec![Alternative::new(text, None)],
        }
    }

    fn is_partial(event: &RecognitionEvent) -> bool {
        matches!(event, RecognitionEvent::Partial { .. })
    }

    fn event_strategy() -> impl Strategy<Value = RecognitionEvent> {
        prop_oneof![
            4 => "[a-z]{1,6}".prop_map(|t| RecognitionEvent::Partial {
                alternatives: vec![Alternative::new(t, None)],
            }),
            2 => "[a-z]{1,6}".prop_map(|t| RecognitionEvent::Final {
                alternatives: vec![Alternative::new(t, Some(0.9))],
            }),
            1 => Just(RecognitionEvent::EndOfStream),
            1 => Just(RecognitionEvent::Error {
                kind: ErrorKind::Transport,
                message: "reset".to_string(),
            }),
        ]
    }

    fn run(policy: &mut EventPolicy, input: Vec<RecognitionEvent>) -> Vec<RecognitionEvent> {
        let mut out = Vec::new();
        for event in input {
            out.extend(policy.apply(event));
        }
        out.extend(policy.apply(RecognitionEvent::EndOfStream));
        out
    }

    #[test]
    fn single_utterance_stops_after_first_final() {
        let mut policy = EventPolicy::new(false, true);
        let out = run(
            &mut policy,
            vec![partial("he"), final_("hello"), partial("wo"), final_("world")],
        );

        assert_eq!(out.len(), 3);
        assert!(is_partial(&out[0]));
        assert_eq!(out[1].best_transcript(), Some("hello"));
        assert_eq!(out[2], RecognitionEvent::EndOfStream);
        assert!(policy.is_done());
        assert_eq!(policy.finals(), 1);
    }

    #[test]
    fn error_is_followed_by_end_of_stream() {
        let mut policy = EventPolicy::new(true, true);
        let out = policy.apply(RecognitionEvent::Error {
            kind: ErrorKind::Decode,
            message: "bad unit".to_string(),
        });
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], RecognitionEvent::EndOfStream);
        assert!(policy.apply(RecognitionEvent::EndOfStream).is_empty());
    }

    proptest! {
        #[test]
        fn output_respects_continuous_and_interim(
            continuous in any::<bool>(),
            interim in any::<bool>(),
            input in proptest::collection::vec(event_strategy(), 0..40),
        ) {
            let mut policy = EventPolicy::new(continuous, interim);
            let out = run(&mut policy, input.clone());

            let eos = out.iter().filter(|e| **e == RecognitionEvent::EndOfStream).count();
            prop_assert_eq!(eos, 1);
            prop_assert_eq!(out.last(), Some(&RecognitionEvent::EndOfStream));

            let finals = out.iter().filter(|e| e.is_final()).count();
            if !continuous {
                prop_assert!(finals <= 1, "{} finals in single-utterance mode", finals);
            }
            if !interim {
                prop_assert!(
                    !out.iter().any(is_partial),
                    "partial delivered with interim off"
                );
            }

            // Delivered results keep the server's order.
            let delivered: Vec<_> = out
                .iter()
                .filter(|e| is_partial(e) || e.is_final())
                .collect();
            let mut source = input.iter();
            for event in delivered {
                prop_assert!(
                    source.any(|candidate| candidate == event),
                    "event delivered out of order: {:?}",
                    event
                );
            }
        }
    }
}
