pub mod enrollment;
pub mod gallery;
pub mod pin;
pub mod prompt;
pub mod verify;

pub use enrollment::{EnrollmentError, EnrollmentService, EnrollmentSession, EnrollmentState};
pub use gallery::{GalleryError, GalleryStore, MongoGalleryStore, NewSpeaker, SpeakerGallery};
pub use pin::{PinError, PinHasher};
pub use prompt::PromptGenerator;
pub use verify::{VerifyError, VerifyOutcome, VerifyService, VerifySession, VerifyState};
