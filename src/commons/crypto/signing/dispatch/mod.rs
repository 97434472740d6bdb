pub mod signerprovider;
