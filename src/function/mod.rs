pub mod tensor_extensions;
