//! Network management logic: NAME field manipulation and address claiming.
pub mod address_claiming;
pub mod iso_name;
