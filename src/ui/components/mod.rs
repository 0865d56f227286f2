pub mod message_input;
pub mod ping_card;
