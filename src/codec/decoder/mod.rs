pub mod decoder_interface;
