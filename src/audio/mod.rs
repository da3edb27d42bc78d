pub mod backend;
pub mod decoder;
#[cfg(feature = "backend-cpal")]
pub mod device;
pub mod encoder;
pub mod file;
pub mod pcm;
pub mod playback;
pub mod sink;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
    BackendFactory, ChannelBackend,
};
pub use decoder::Waveform;
#[cfg(feature = "backend-cpal")]
pub use device::{MicrophoneBackend, SpeakerSink};
pub use encoder::{AudioEncoding, EncodedFrame, FrameEncoder};
pub use file::{AudioFile, FileBackend};
pub use playback::{PlaybackPipeline, PlaybackQueue};
pub use sink::{AudioSink, ChannelSink, NullSink, PlaybackOutput, WavFileSink};
