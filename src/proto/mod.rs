// Generated by tonic-build from proto/*.proto at compile time.

pub mod common {
    tonic::include_proto!("estoque.common");
}

pub mod auth {
    tonic::include_proto!("estoque.auth");
}

pub mod items {
    tonic::include_proto!("estoque.items");
}

pub mod requests {
    tonic::include_proto!("estoque.requests");
}

pub mod importer {
    tonic::include_proto!("estoque.importer");
}

pub mod admin {
    tonic::include_proto!("estoque.admin");
}

pub mod health {
    tonic::include_proto!("grpc.health.v1");
}
