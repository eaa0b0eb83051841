pub mod health_dto;
