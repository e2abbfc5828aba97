//! Event-correlation and timing-assertion engine.
//!
//! The receive pump of the [`adapter`] turns every inbound frame into a
//! [`event::CapturedEvent`] and hands it to the [`dispatcher`], which pushes
//! it into each live [`queue::CorrelationQueue`] whose filter matches.
//! Scenario logic drains those queues with bounded waits and checks the
//! captured events with the [`assertions`]; the [`sequencer`] runs the
//! scenarios one by one.
pub mod adapter;
pub mod assertions;
pub mod device_control;
pub mod dispatcher;
pub mod event;
pub mod queue;
pub mod scenario;
pub mod sequencer;
