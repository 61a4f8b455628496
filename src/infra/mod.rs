pub mod qualtrics;
