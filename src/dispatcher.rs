//! Handoff of received frames from the radio interrupt to the engine
//!
//! The interrupt handler owns a [`FrameProducer`] and only copies frames into
//! the queue. The processing context owns the engine and the
//! [`FrameConsumer`], and calls [`TwrEngine::process_pending`] to answer
//! whatever arrived.
//!
//! ``` rust
//! use uwb_twr::dispatcher::{self, FrameQueue};
//! use uwb_twr::time::Instant;
//!
//! let mut queue = FrameQueue::new();
//! let (mut producer, consumer) = dispatcher::split(&mut queue);
//!
//! // In the interrupt handler
//! assert!(producer.on_frame_received(&[0x41, 0x88, 0x0d, 0, 3, 0xff], Instant::default()));
//!
//! // In the processing context
//! assert!(consumer.ready());
//! ```

#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embedded_hal::delay::DelayNs;
use heapless::{
    spsc::{Consumer, Producer, Queue},
    Vec,
};
#[cfg(not(feature = "defmt"))]
use log::{debug, warn};

use crate::{
    frame::{self, FrameError, MessageType, MAX_FRAME_LEN},
    host::{response, HostLink},
    radio::Radio,
    time::Instant,
    twr::{Error, RangingResult, TwrEngine},
};

/// Size of the queue storage, which holds one frame less
pub const QUEUE_LEN: usize = 2;

/// A frame received outside of an exchange
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RxFrame {
    /// The frame, without FCS
    pub data: Vec<u8, MAX_FRAME_LEN>,
    /// RX timestamp of the frame
    pub rx_time: Instant,
}

/// Storage shared by producer and consumer
pub type FrameQueue = Queue<RxFrame, QUEUE_LEN>;

/// Splits the queue into its interrupt side and its processing side
pub fn split(queue: &mut FrameQueue) -> (FrameProducer<'_>, FrameConsumer<'_>) {
    let (producer, consumer) = queue.split();
    (
        FrameProducer {
            producer,
            dropped: 0,
        },
        FrameConsumer { consumer },
    )
}

/// Interrupt side of the queue
pub struct FrameProducer<'q> {
    producer: Producer<'q, RxFrame, QUEUE_LEN>,
    dropped: u32,
}

impl<'q> FrameProducer<'q> {
    /// Hands a received frame over to the processing context
    ///
    /// Returns `false` and counts the frame as dropped if it does not fit a
    /// PSDU or the previous frame was not processed yet.
    pub fn on_frame_received(&mut self, data: &[u8], rx_time: Instant) -> bool {
        let Ok(data) = Vec::from_slice(data) else {
            self.dropped = self.dropped.wrapping_add(1);
            return false;
        };
        if self.producer.enqueue(RxFrame { data, rx_time }).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
            return false;
        }
        true
    }

    /// Number of frames dropped so far
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Processing side of the queue
pub struct FrameConsumer<'q> {
    consumer: Consumer<'q, RxFrame, QUEUE_LEN>,
}

impl<'q> FrameConsumer<'q> {
    /// Whether a frame waits to be processed
    pub fn ready(&self) -> bool {
        self.consumer.ready()
    }

    fn next(&mut self) -> Option<RxFrame> {
        self.consumer.dequeue()
    }
}

/// What became of a received frame
#[derive(Debug)]
pub enum Dispatch<E> {
    /// A POLL was answered, with the result if we were asked to measure too
    Responded(Option<RangingResult>),
    /// The payload of a DATA frame was sent to the host
    Relayed,
    /// A frame that only makes sense within an exchange
    Unexpected(MessageType),
    /// The frame could not be decoded
    Malformed(FrameError),
    /// Answering or following the exchange failed
    Failed(Error<E>),
}

impl<R, D, H> TwrEngine<R, D, H>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    /// Processes the oldest received frame, if any
    ///
    /// The receiver is re-armed afterwards.
    pub fn process_next(&mut self, frames: &mut FrameConsumer) -> Option<Dispatch<R::Error>> {
        let received = frames.next()?;
        let dispatch = self.dispatch(&received);

        if let Err(error) = self.rearm_receiver() {
            warn!("re-arming the receiver failed: {}", error.reason());
        }
        Some(dispatch)
    }

    /// Processes every received frame, oldest first
    ///
    /// Returns the number of frames processed.
    pub fn process_pending(&mut self, frames: &mut FrameConsumer) -> usize {
        let mut count = 0;
        while self.process_next(frames).is_some() {
            count += 1;
        }
        count
    }

    fn dispatch(&mut self, received: &RxFrame) -> Dispatch<R::Error> {
        let header = match frame::decode_header(&received.data) {
            Ok(header) => header,
            Err(error) => {
                debug!("dropping frame of {} bytes", received.data.len());
                return Dispatch::Malformed(error);
            }
        };

        match header.message_type {
            MessageType::Poll => match self.respond(&received.data, received.rx_time) {
                Ok(result) => Dispatch::Responded(result),
                Err(Error::MalformedFrame(error)) => Dispatch::Malformed(error),
                Err(error) => Dispatch::Failed(error),
            },
            MessageType::Data => match frame::decode_data(&received.data) {
                Ok((_, payload)) => {
                    self.report(&response::data_relay(payload));
                    Dispatch::Relayed
                }
                Err(error) => Dispatch::Malformed(error),
            },
            message_type @ (MessageType::Response | MessageType::Final) => {
                warn!(
                    "{:?} from {} outside of an exchange",
                    message_type, header.initiator
                );
                Dispatch::Unexpected(message_type)
            }
        }
    }
}
