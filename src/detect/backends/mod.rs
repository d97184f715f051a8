pub mod cpu;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::CpuBackend;
#[cfg(any(test, feature = "test-fixtures"))]
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
