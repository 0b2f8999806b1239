//! Behavioural scenarios for `bootstrap-gather bootstrap`.

mod gather;
