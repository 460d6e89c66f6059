pub mod timecode;
